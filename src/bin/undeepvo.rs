// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use undeepvo::config::{DataFormat, InputMode, NetConfig};
use undeepvo::misc::interop;
use undeepvo::{Result, UnDeepVoNet};

/// UnDeepVO encoder-decoder network.
#[derive(Parser, Debug)]
#[command(name = "undeepvo", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Options shared by every command to pick a network configuration.
#[derive(clap::Args, Debug)]
struct NetArgs {
    /// JSON configuration file, overrides the other options.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Height of each image of the stereo pair.
    #[arg(long, default_value_t = 128)]
    rows: usize,
    /// Width of each image of the stereo pair.
    #[arg(long, default_value_t = 416)]
    cols: usize,
    /// Encode both images stacked instead of the left image only.
    #[arg(long)]
    stereo: bool,
    /// Seed of the weights initialization.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the layers, output shapes and parameter counts.
    Summary(NetArgs),
    /// Print the configuration as JSON.
    Config(NetArgs),
    /// Run the network on a stereo pair and save output channels as images.
    Infer {
        #[command(flatten)]
        net: NetArgs,
        /// Side by side stereo image, or the left image if --right is given.
        image: PathBuf,
        /// Right image of the pair.
        #[arg(long)]
        right: Option<PathBuf>,
        /// Output channels to save.
        #[arg(long, value_delimiter = ',', default_value = "0")]
        channels: Vec<usize>,
        /// Directory where channel images are written.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        error!("{}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Summary(net) => {
            let config = net_config(&net)?;
            let architecture = undeepvo::core::summary::Architecture::from_config(&config)?;
            println!("{}", architecture);
        }
        Command::Config(net) => {
            println!("{}", net_config(&net)?.to_json()?);
        }
        Command::Infer {
            net,
            image,
            right,
            channels,
            out_dir,
        } => infer(&net, &image, right.as_deref(), &channels, &out_dir)?,
    }
    Ok(())
}

/// Build the configuration from a file or from the command line options.
fn net_config(args: &NetArgs) -> Result<NetConfig> {
    if let Some(path) = &args.config {
        return NetConfig::from_json_file(path);
    }
    let mut config = NetConfig::new(args.rows, args.cols);
    config.seed = args.seed;
    if args.stereo {
        config.input_mode = InputMode::Stereo;
    }
    config.validate()?;
    Ok(config)
}

fn infer(
    args: &NetArgs,
    image: &Path,
    right: Option<&Path>,
    channels: &[usize],
    out_dir: &Path,
) -> Result<()> {
    let config = net_config(args)?;
    let (width, height) = (config.img_cols as u32, config.img_rows as u32);

    // Both images are resized to the network resolution.
    let stereo = match right {
        Some(right) => {
            let left = interop::resize_rgb(interop::read_rgb(image)?, width, height);
            let right = interop::resize_rgb(interop::read_rgb(right)?, width, height);
            interop::stereo_from_pair(&left, &right)?
        }
        None => {
            let pair = interop::resize_rgb(interop::read_rgb(image)?, 2 * width, height);
            interop::tensor_from_rgb(&pair)
        }
    };
    let stereo = match config.data_format {
        DataFormat::ChannelsLast => stereo,
        DataFormat::ChannelsFirst => stereo.nhwc_to_nchw(),
    };

    let mut net = UnDeepVoNet::build(config)?;
    let output = net.predict(&stereo)?;
    let output = match net.config().data_format {
        DataFormat::ChannelsLast => output,
        DataFormat::ChannelsFirst => output.nchw_to_nhwc(),
    };

    std::fs::create_dir_all(out_dir)?;
    for &c in channels {
        let path = out_dir.join(format!("channel_{:02}.png", c));
        interop::image_from_channel(&output, 0, c)?.save(&path)?;
        info!("wrote {}", path.display());
    }
    Ok(())
}
