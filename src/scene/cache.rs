//! Session-owned bitmap arena and font cache.
//!
//! Nothing here is global: a session owns one of each and clears them on
//! teardown. Handles are generation-checked so a released slot can never be
//! read through a stale handle.

use image::RgbaImage;
use rusttype::Font;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::AssetLoadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Default)]
struct Entry {
    generation: u32,
    image: Option<Arc<RgbaImage>>,
}

#[derive(Debug, Default)]
pub struct ImageCache {
    entries: Vec<Entry>,
    free: Vec<u32>,
    live: usize,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, image: Arc<RgbaImage>) -> ImageHandle {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.image = Some(image);
            return ImageHandle {
                index,
                generation: entry.generation,
            };
        }
        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            generation: 0,
            image: Some(image),
        });
        ImageHandle { index, generation: 0 }
    }

    pub fn get(&self, handle: ImageHandle) -> Option<&Arc<RgbaImage>> {
        self.entries
            .get(handle.index as usize)
            .filter(|e| e.generation == handle.generation)
            .and_then(|e| e.image.as_ref())
    }

    /// Drop the bitmap behind `handle`. Returns false for stale handles.
    pub fn release(&mut self, handle: ImageHandle) -> bool {
        let Some(entry) = self.entries.get_mut(handle.index as usize) else {
            return false;
        };
        if entry.generation != handle.generation || entry.image.is_none() {
            return false;
        }
        entry.image = None;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        true
    }

    /// Release every bitmap. Outstanding handles all become stale.
    pub fn clear(&mut self) {
        self.free.clear();
        for (index, entry) in self.entries.iter_mut().enumerate() {
            entry.image = None;
            entry.generation = entry.generation.wrapping_add(1);
            self.free.push(index as u32);
        }
        self.live = 0;
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

#[derive(Default)]
pub struct FontCache {
    fonts: HashMap<String, Arc<Font<'static>>>,
}

impl FontCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_bytes(&mut self, reference: &str, bytes: Vec<u8>) -> Result<(), AssetLoadError> {
        let font = Font::try_from_vec(bytes).ok_or_else(|| AssetLoadError::InvalidFont {
            reference: reference.to_string(),
        })?;
        self.fonts.insert(reference.to_string(), Arc::new(font));
        Ok(())
    }

    pub fn get(&self, reference: &str) -> Option<&Font<'static>> {
        self.fonts.get(reference).map(|f| f.as_ref())
    }

    pub fn clear(&mut self) {
        self.fonts.clear();
    }

    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }
}
