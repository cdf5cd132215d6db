//! PrintForge CLI - Bridge interface for the storefront
//!
//! Commands: layouts, validate, render, crop, project, scene
//! Outputs JSON to stdout
//! Returns non-zero on validation failure

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use printforge_core::{
    assets::DirectoryAssetLoader,
    config::EngineConfig,
    crop::crop,
    geometry::Rect,
    layout::LayoutRegistry,
    pipeline::{PhysicalOverride, RenderPipeline, RenderRequest},
    raster,
    scene::{SceneSession, SceneSnapshot},
};

#[derive(Parser)]
#[command(name = "printforge-cli")]
#[command(about = "PrintForge CLI - Personalization Rendering Engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to layouts directory
    #[arg(short, long, default_value = "layouts")]
    layouts_dir: PathBuf,

    /// Engine config (JSON); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available layouts
    Layouts,

    /// Validate a layout, optionally against its base artwork
    Validate {
        #[arg(short = 'L', long)]
        layout: String,

        /// Base artwork image (PNG/JPEG)
        #[arg(short, long)]
        base: Option<PathBuf>,
    },

    /// Render a personalization
    Render {
        /// JSON payload (RenderRequest)
        #[arg(short, long)]
        payload: String,

        /// Write preview.png and print.png here
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// Directory the configured label font resolves against
        #[arg(short, long, default_value = ".")]
        assets_dir: PathBuf,
    },

    /// Crop an image to an aspect ratio within the byte budget
    Crop {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Target aspect ratio (width / height)
        #[arg(short, long)]
        aspect: Option<f64>,

        /// Explicit selection as x,y,width,height in source pixels
        #[arg(short, long, value_delimiter = ',', num_args = 4)]
        selection: Option<Vec<f64>>,
    },

    /// Compute 3D surface textures for a rendered raster
    Project {
        #[arg(short = 'L', long)]
        layout: String,

        /// Final raster (PNG)
        #[arg(short, long)]
        raster: PathBuf,

        #[arg(long)]
        print_height_m: Option<f64>,

        #[arg(long)]
        cylinder_radius_m: Option<f64>,
    },

    /// Load a scene, apply edits and export it
    Scene {
        /// Snapshot JSON; a fresh scene is built from --layout otherwise
        #[arg(short, long)]
        snapshot: Option<PathBuf>,

        #[arg(short = 'L', long)]
        layout: Option<String>,

        /// Directory asset references resolve against
        #[arg(short, long, default_value = ".")]
        assets_dir: PathBuf,

        /// Text edits as id=value
        #[arg(short, long)]
        text: Vec<String>,

        /// Photo uploads as id=path
        #[arg(short, long)]
        upload: Vec<String>,

        #[arg(short, long)]
        out_dir: PathBuf,
    },
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => println!(r#"{{"success": false, "error": "Serialization failed: {}"}}"#, e),
    }
}

fn fail(message: impl std::fmt::Display) -> ExitCode {
    print_json(&json!({ "success": false, "error": message.to_string() }));
    ExitCode::FAILURE
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, String> {
    match path {
        Some(p) => EngineConfig::load(p).map_err(|e| e.to_string()),
        None => Ok(EngineConfig::default()),
    }
}

fn read_image(path: &Path, config: &EngineConfig) -> Result<image::RgbaImage, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    raster::decode_image(&bytes, &config.decode).map_err(|e| format!("{}: {}", path.display(), e))
}

fn write_png(dir: &Path, name: &str, image: &image::RgbaImage) -> Result<PathBuf, String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("{}: {}", dir.display(), e))?;
    let path = dir.join(name);
    let data = raster::encode_png(image).map_err(|e| e.to_string())?;
    std::fs::write(&path, data).map_err(|e| format!("{}: {}", path.display(), e))?;
    Ok(path)
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| e.to_string())
}

fn split_pair(raw: &str) -> Result<(&str, &str), String> {
    raw.split_once('=')
        .ok_or_else(|| format!("Expected id=value, got {}", raw))
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => return fail(format!("Failed to load config: {}", e)),
    };

    // Load layouts
    let registry = match LayoutRegistry::load_from_dir(&cli.layouts_dir) {
        Ok(r) => r,
        Err(e) => return fail(format!("Failed to load layouts: {}", e)),
    };

    let mut pipeline = RenderPipeline::new(registry, config);

    match cli.command {
        Commands::Layouts => {
            let layouts: Vec<_> = pipeline
                .list_layouts()
                .iter()
                .map(|l| {
                    json!({
                        "id": l.id,
                        "name": l.name,
                        "itemType": l.item_type,
                        "size": [l.print_area_width_px, l.print_area_height_px],
                        "slots": l.slots.len(),
                    })
                })
                .collect();
            print_json(&layouts);
            ExitCode::SUCCESS
        }

        Commands::Validate { layout, base } => {
            let base = match base {
                Some(path) => match read_image(&path, pipeline.config()) {
                    Ok(img) => Some(img),
                    Err(e) => return fail(e),
                },
                None => None,
            };
            match pipeline.validate_layout(&layout, base.as_ref()) {
                Ok(result) => {
                    print_json(&result);
                    if result.valid {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::from(2) // Validation failure
                    }
                }
                Err(e) => fail(e),
            }
        }

        Commands::Render {
            payload,
            out_dir,
            assets_dir,
        } => {
            let request: RenderRequest = match serde_json::from_str(&payload) {
                Ok(r) => r,
                Err(e) => return fail(format!("Invalid payload: {}", e)),
            };
            if pipeline.config().render.label_font_ref.is_some() {
                let loader = DirectoryAssetLoader::new(&assets_dir);
                let loaded = runtime().and_then(|rt| {
                    rt.block_on(pipeline.load_label_font(&loader))
                        .map_err(|e| e.to_string())
                });
                if let Err(e) = loaded {
                    return fail(format!("Failed to load label font: {}", e));
                }
            }
            match pipeline.render(&request) {
                Ok(rendered) => {
                    if let Some(dir) = out_dir {
                        for export in &rendered.exports {
                            let written = export
                                .decode_data()
                                .map_err(|e| e.to_string())
                                .and_then(|data| {
                                    std::fs::create_dir_all(&dir).map_err(|e| e.to_string())?;
                                    std::fs::write(dir.join(&export.filename), data).map_err(|e| e.to_string())
                                });
                            if let Err(e) = written {
                                return fail(e);
                            }
                        }
                    }
                    print_json(&json!({ "success": true, "render": rendered }));
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    print_json(&json!({ "success": false, "error": e.to_string() }));
                    ExitCode::from(2) // Render failure (validation)
                }
            }
        }

        Commands::Crop { input, output, aspect, selection } => {
            let source = match read_image(&input, pipeline.config()) {
                Ok(img) => img,
                Err(e) => return fail(e),
            };
            let selection = selection.map(|s| Rect::new(s[0], s[1], s[2], s[3]));
            match crop(&source, selection, aspect, &pipeline.config().crop) {
                Ok(out) => {
                    if let Err(e) = std::fs::write(&output, &out.encoded) {
                        return fail(format!("{}: {}", output.display(), e));
                    }
                    print_json(&json!({
                        "success": true,
                        "output": output.display().to_string(),
                        "size": [out.image.width(), out.image.height()],
                        "bytes": out.encoded.len(),
                        "scale": out.scale,
                        "reductions": out.reductions,
                        "selection": out.selection,
                    }));
                    ExitCode::SUCCESS
                }
                Err(e) => fail(e),
            }
        }

        Commands::Project {
            layout,
            raster: raster_path,
            print_height_m,
            cylinder_radius_m,
        } => {
            let image = match read_image(&raster_path, pipeline.config()) {
                Ok(img) => img,
                Err(e) => return fail(e),
            };
            let physical_override = PhysicalOverride {
                print_height_m,
                cylinder_radius_m,
            };
            match pipeline.project(&layout, &image, Some(&physical_override)) {
                Ok((physical, surfaces)) => {
                    print_json(&json!({ "success": true, "physical": physical, "surfaces": surfaces }));
                    ExitCode::SUCCESS
                }
                Err(e) => fail(e),
            }
        }

        Commands::Scene {
            snapshot,
            layout,
            assets_dir,
            text,
            upload,
            out_dir,
        } => {
            let snapshot = match (snapshot, layout) {
                (Some(path), _) => match std::fs::read_to_string(&path)
                    .map_err(|e| e.to_string())
                    .and_then(|json| SceneSnapshot::from_json(&json).map_err(|e| e.to_string()))
                {
                    Ok(s) => s,
                    Err(e) => return fail(format!("{}: {}", path.display(), e)),
                },
                (None, Some(id)) => match pipeline.get_layout(&id) {
                    Some(l) => SceneSnapshot::from_layout(l),
                    None => return fail(format!("Layout not found: {}", id)),
                },
                (None, None) => return fail("Either --snapshot or --layout is required"),
            };

            let rt = match runtime() {
                Ok(rt) => rt,
                Err(e) => return fail(e),
            };
            let mut session = SceneSession::new(pipeline.config().clone());
            let loader = DirectoryAssetLoader::new(&assets_dir);
            if let Err(e) = rt.block_on(session.load(&snapshot, &loader)) {
                return fail(e);
            }

            for edit in &text {
                let result = split_pair(edit).and_then(|(id, value)| {
                    session.set_text(id, value).map_err(|e| e.to_string())
                });
                if let Err(e) = result {
                    return fail(e);
                }
            }
            for entry in &upload {
                let result = split_pair(entry).and_then(|(id, path)| {
                    let bytes = std::fs::read(path).map_err(|e| format!("{}: {}", path, e))?;
                    session.assign_upload(id, path, &bytes).map_err(|e| e.to_string())
                });
                if let Err(e) = result {
                    return fail(e);
                }
            }

            let export = match session.export() {
                Ok(x) => x,
                Err(e) => return fail(e),
            };
            let written = write_png(&out_dir, "preview.png", &export.preview)
                .and_then(|_| write_png(&out_dir, "print.png", &export.high_res))
                .and_then(|_| {
                    let json = export.snapshot.to_json().map_err(|e| e.to_string())?;
                    let path = out_dir.join("snapshot.json");
                    std::fs::write(&path, json).map_err(|e| format!("{}: {}", path.display(), e))
                });
            if let Err(e) = written {
                return fail(e);
            }

            print_json(&json!({
                "success": true,
                "state": session.state(),
                "regions": export.regions,
                "warnings": session.warnings(),
                "outDir": out_dir.display().to_string(),
            }));
            ExitCode::SUCCESS
        }
    }
}
