use std::path::PathBuf;
use std::process::ExitCode;
use clap::{Parser, Subcommand};
use tilemosaic::{logging, Config, Result, TiffReader, TilePipeline};

#[derive(Parser)]
#[command(name = "tilemosaic")]
#[command(about = "Tiled processing of large georeferenced rasters")]
struct Args {
    /// Enable debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Partition, process and merge as configured
    Run {
        /// Path to TOML configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Plan the tile grid and print or export it
    Grid {
        #[arg(short, long)]
        config: PathBuf,

        /// Write tile cores as a GeoJSON FeatureCollection
        #[arg(long)]
        geojson: Option<PathBuf>,
    },
    /// Print TIFF and GeoTIFF metadata
    Info {
        file: PathBuf,
    },
    /// Merge tile outputs listed in an existing manifest
    Merge {
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose);

    match execute(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn execute(command: Command) -> Result<()> {
    match command {
        Command::Run { config } => {
            let report = TilePipeline::new(Config::from_file(&config)?).run_configured()?;
            println!("{}", report);
        }
        Command::Grid { config, geojson } => {
            let grid = TilePipeline::new(Config::from_file(&config)?).plan()?;
            println!(
                "Grid: {} rows x {} cols ({} tiles), working extent {}",
                grid.rows,
                grid.cols,
                grid.len(),
                grid.working_extent
            );
            match geojson {
                Some(path) => {
                    grid.to_feature_collection().write(&path)?;
                    println!("Wrote {}", path.display());
                }
                None => {
                    for tile in grid.tiles() {
                        println!("  {}  core {}  buffered {}", tile.id, tile.core, tile.buffered);
                    }
                }
            }
        }
        Command::Info { file } => {
            let reader = TiffReader::open(&file)?;
            println!("{}", reader.tiff());
            let ifd = reader.main_ifd()?;
            print!("{}", reader.image_info(ifd)?);
            match reader.geo_info(ifd)? {
                Some(geo) => println!("{}", geo),
                None => println!("No GeoTIFF georeferencing"),
            }
        }
        Command::Merge { config } => {
            let report = TilePipeline::new(Config::from_file(&config)?).merge_existing()?;
            println!("{}", report);
        }
    }
    Ok(())
}
