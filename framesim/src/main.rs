use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use buffer_swapper::backend::{
    allocator::{
        format::known_formats,
        memory::{MemoryAllocator, MemoryBuffer},
        Buffer, BufferProperties, BufferUsage, Fourcc,
    },
    swapper::{
        BufferSwapper, ClientBuffer, CompositorBuffer, SwapperDirector, SwapperError, SwapperFactory,
        SwapperStrategy, DEFAULT_BUFFERS,
    },
};
use clap::{Parser, ValueEnum};
use tracing::{debug, info, warn};

/// Run a simulated client against a simulated compositor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Swapping strategy to start with
    #[arg(short, long, default_value = "queueing")]
    strategy: Strategy,
    /// Number of buffers used by the queueing strategy
    #[arg(short, long, default_value_t = DEFAULT_BUFFERS)]
    buffers: usize,

    #[arg(long, default_value_t = 256)]
    width: i32,
    #[arg(long, default_value_t = 256)]
    height: i32,
    #[arg(short, long, default_value = "Argb8888", value_parser = fourcc_from_string)]
    fourcc: Fourcc,

    /// Number of frames the client submits
    #[arg(short = 'n', long, default_value_t = 120)]
    frames: u32,
    /// Time the client spends drawing a frame
    #[arg(long, default_value_t = 4)]
    client_interval_ms: u64,
    /// Time between two compositor repaints
    #[arg(long, default_value_t = 16)]
    compositor_interval_ms: u64,

    /// Abort the client after this many repaints
    #[arg(long)]
    abort_after: Option<u32>,
    /// Toggle framedropping after this many repaints
    #[arg(long)]
    switch_after: Option<u32>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Strategy {
    #[value(name = "queueing")]
    Queueing,
    #[value(name = "spinning")]
    Spinning,
}

impl From<Strategy> for SwapperStrategy {
    fn from(strategy: Strategy) -> SwapperStrategy {
        match strategy {
            Strategy::Queueing => SwapperStrategy::Queueing,
            Strategy::Spinning => SwapperStrategy::Spinning,
        }
    }
}

fn fourcc_from_string(name: &str) -> Result<Fourcc, String> {
    known_formats()
        .iter()
        .copied()
        .find(|fourcc| format!("{:?}", fourcc).eq_ignore_ascii_case(name))
        .ok_or_else(|| format!("unsupported format {}", name))
}

#[derive(Debug, Default)]
struct Stats {
    displayed: u32,
    repeated: u32,
    idle: u32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    if let Ok(env_filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().init();
    }

    let factory: SwapperFactory<_, MemoryBuffer> =
        SwapperFactory::with_buffer_count(MemoryAllocator::new(), args.buffers)?;
    let properties = BufferProperties::new((args.width, args.height), args.fourcc, BufferUsage::Software);
    let director = factory.create_swapper(&properties, args.strategy.into())?;
    info!(strategy = %director.strategy(), ?properties, "Created swapper");

    let client = {
        let director = director.clone();
        let interval = Duration::from_millis(args.client_interval_ms);
        let frames = args.frames;
        thread::Builder::new()
            .name("client".into())
            .spawn(move || run_client(&director, frames, interval))?
    };

    let stats = run_compositor(&director, &args, &client);

    director.shutdown();
    let submitted = client.join().map_err(|_| "client thread panicked")?;
    info!(
        submitted,
        displayed = stats.displayed,
        repeated = stats.repeated,
        idle = stats.idle,
        "Simulation finished"
    );

    Ok(())
}

fn run_client(director: &Arc<SwapperDirector<MemoryBuffer>>, frames: u32, interval: Duration) -> u32 {
    for frame in 0..frames {
        let buffer = match ClientBuffer::acquire(director) {
            Ok(buffer) => buffer,
            Err(SwapperError::Aborted) | Err(SwapperError::Retired) => {
                info!(frame, "Client was stopped");
                return frame;
            }
            Err(err) => {
                warn!(?err, "Client failed to acquire a buffer");
                return frame;
            }
        };

        let start = Instant::now();
        buffer.with_pixels_mut(|pixels| pixels.fill(frame as u8));
        thread::sleep(interval.saturating_sub(start.elapsed()));

        if let Err(err) = buffer.release() {
            debug!(?err, frame, "Frame was not submitted");
            return frame;
        }
    }
    frames
}

fn run_compositor(
    director: &Arc<SwapperDirector<MemoryBuffer>>,
    args: &Cli,
    client: &thread::JoinHandle<u32>,
) -> Stats {
    let interval = Duration::from_millis(args.compositor_interval_ms);
    let mut stats = Stats::default();
    let mut last_frame = None;
    let mut repaint = 0;

    loop {
        thread::sleep(interval);
        repaint += 1;

        if client.is_finished() && director.snapshot().free_for_compositor == 0 {
            break;
        }

        match CompositorBuffer::acquire(director) {
            Ok(buffer) => {
                let frame = buffer.with_pixels(|pixels| pixels.first().copied());
                if frame.is_some() && frame == last_frame {
                    stats.repeated += 1;
                } else {
                    stats.displayed += 1;
                }
                last_frame = frame;
                debug!(id = %buffer.id(), ?frame, "Displaying buffer");
            }
            Err(SwapperError::NoBufferAvailable) => stats.idle += 1,
            Err(err) => {
                warn!(?err, "Compositor failed to acquire a buffer");
                break;
            }
        }

        if args.switch_after == Some(repaint) {
            let allowed = !director.framedropping_allowed();
            match director.allow_framedropping(allowed) {
                Ok(()) => info!(strategy = %director.strategy(), "Switched strategy"),
                Err(err) => warn!(?err, "Failed to switch strategy"),
            }
        }
        if args.abort_after == Some(repaint) {
            info!(repaint, "Aborting client");
            director.force_client_abort();
        }
    }

    stats
}
