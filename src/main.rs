//! LED scales control server.
//!
//! Drives a wall of addressable RGBW LEDs (scale panels or a hexagon
//! tiling) and serves the control UI on the local network.
//!
//! ## Architecture
//! - **Render thread** (`std::thread`): owns the pixel sink, produces one
//!   frame per tick
//! - **HTTP server** (tokio/axum): control plane + Socket.IO viewer stream
//! - **Broadcaster task**: fans frames out to viewers at a capped rate
//!
//! ## Usage
//! ```sh
//! led-scales scale --mock --debug        # develop against the mock sink
//! sudo led-scales hex --port 5001        # real hardware on a Pi
//! led-scales hex --setup                 # interactive LED-to-cell mapping
//! ```

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use led_scales::broadcast::Broadcaster;
use led_scales::layout::{HexCell, HexLayout, HexSetup, Layout, ScaleLayout};
use led_scales::render::{render_loop, MOCK_TICK, REAL_TICK};
use led_scales::server::{self, AppState};
use led_scales::sink::create_sink;
use led_scales::socketio::Sessions;
use led_scales::store;
use led_scales::Rgbw;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LayoutMode {
    Scale,
    Hex,
}

/// LED scales control server
#[derive(Parser)]
#[command(name = "led-scales")]
#[command(about = "HTTP control server and render engine for the LED scales wall")]
#[command(version)]
struct Args {
    /// Physical layout to drive
    #[arg(value_enum)]
    mode: LayoutMode,

    /// Use the in-memory mock sink instead of real hardware
    #[arg(long)]
    mock: bool,

    /// Verbose logging plus a once-per-second FPS line
    #[arg(long)]
    debug: bool,

    /// Port to listen on
    #[arg(long, default_value = "5001")]
    port: u16,

    /// Directory with the visualizer UI assets
    #[arg(long, default_value = "static")]
    static_dir: PathBuf,

    /// Configuration blob location (defaults to ~/.led_config.json)
    #[arg(long)]
    config_path: Option<PathBuf>,

    /// Hex cell table produced by --setup (JSON)
    #[arg(long)]
    hex_cells: Option<PathBuf>,

    /// Run the interactive hex assembly tool instead of the server
    #[arg(long)]
    setup: bool,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_target(false)
        .with_ansi(false) // systemd/journald friendly
        .compact()
        .init();

    let result = if args.setup {
        run_hex_setup(&args)
    } else {
        serve(args)
    };
    if let Err(e) = result {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

fn build_layout(args: &Args) -> Result<Layout, Box<dyn std::error::Error>> {
    match args.mode {
        LayoutMode::Scale => Ok(Layout::Scale(ScaleLayout::default())),
        LayoutMode::Hex => {
            let cells = match &args.hex_cells {
                Some(path) => {
                    let text = std::fs::read_to_string(path)?;
                    parse_hex_cells(&text)?
                }
                None => return Ok(Layout::Hex(HexLayout::tiled(4, 3, 12))),
            };
            Ok(Layout::Hex(HexLayout::new(cells)?))
        }
    }
}

/// Accept either the `--setup` export shape (`{"hexagons": [...]}`) or a
/// bare cell array.
fn parse_hex_cells(text: &str) -> Result<Vec<HexCell>, Box<dyn std::error::Error>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let cells = match value.get("hexagons") {
        Some(array) => array.clone(),
        None => value,
    };
    Ok(serde_json::from_value(cells)?)
}

// ── Server mode ────────────────────────────────────────────────────

#[tokio::main]
async fn serve(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let layout = Arc::new(build_layout(&args)?);
    let config_path = args.config_path.clone().unwrap_or_else(store::default_path);
    let state = store::load(&config_path).into_state(&layout).shared();
    let broadcaster = Broadcaster::new();
    let sink = create_sink(args.mock, layout.pixel_count());
    let tick = if sink.is_mock() { MOCK_TICK } else { REAL_TICK };

    tracing::info!("led-scales v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "layout: {:?} ({} LEDs), sink: {}",
        args.mode,
        layout.pixel_count(),
        if sink.is_mock() { "mock" } else { "ws281x" }
    );
    tracing::info!("config: {}", config_path.display());

    // Ctrl-C flips the flag; the render loop blacks out and exits, the
    // server drains gracefully.
    let running = Arc::new(AtomicBool::new(true));
    {
        let r = running.clone();
        ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))?;
    }

    let render_handle = {
        let state = state.clone();
        let layout = layout.clone();
        let broadcaster = broadcaster.clone();
        let running = running.clone();
        let debug = args.debug;
        std::thread::spawn(move || {
            render_loop(state, layout, sink, broadcaster, running, tick, debug)
        })
    };

    tokio::spawn(broadcaster.clone().run_sender());

    let app = AppState {
        state,
        broadcaster,
        sessions: Sessions::new(),
        layout,
        config_path,
    };
    let router = server::create_router(app, args.static_dir.clone());

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{addr}");
    tracing::info!("API docs: http://localhost:{}/docs", args.port);

    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_stop(running.clone()))
        .await?;

    running.store(false, Ordering::SeqCst);
    if render_handle.join().is_err() {
        tracing::warn!("render thread panicked during shutdown");
    }
    tracing::info!("clean shutdown");
    Ok(())
}

async fn wait_for_stop(running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

// ── Hex setup mode ─────────────────────────────────────────────────

/// Interactive LED-to-cell assignment: blinks the cursor LED, reads the
/// cell number it belongs to, and prints the cell table on EOF.
fn run_hex_setup(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let layout = build_layout(args)?;
    let Layout::Hex(hex) = &layout else {
        return Err("setup mode requires the hex layout".into());
    };

    let mut sink = create_sink(args.mock, layout.pixel_count());
    let positions: Vec<(f32, f32)> = hex.cells().iter().map(|c| (c.x, c.y)).collect();
    let mut setup = HexSetup::new(positions, layout.pixel_count());
    let mut frame = vec![Rgbw::BLACK; layout.pixel_count()];
    let mut last_cell = 0usize;

    println!("Assign each lit LED to its hexagon (0..{}).", hex.cells().len() - 1);
    println!("Empty input repeats the previous cell; Ctrl-D finishes.");

    let stdin = io::stdin();
    loop {
        frame.fill(Rgbw::BLACK);
        frame[setup.current_led()] = Rgbw::new(255, 255, 255, 0);
        if let Err(e) = sink.write(&frame) {
            tracing::warn!("sink write failed: {e}");
        }

        print!("Hex for pixel {}: ", setup.current_led());
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF: done
        }
        let cell = line.trim().parse().unwrap_or(last_cell);
        last_cell = cell;

        let led = setup.current_led();
        match setup.assign(led, cell) {
            Ok(()) => setup.next(),
            Err(e) => eprintln!("{e}"),
        }
    }

    frame.fill(Rgbw::BLACK);
    let _ = sink.write(&frame);
    println!("{}", serde_json::to_string_pretty(&setup.export())?);
    Ok(())
}
