use clap::Parser;
use server::game::WorldConfig;
use server::network::{Config, Server};
use std::time::Duration;

/// Main-method of the application.
/// Parses command-line arguments, binds the listener, then runs the
/// accept loop and tick loop until interrupted.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value_t = shared::DEFAULT_PORT)]
        port: u16,
        /// Grid width in cells
        #[clap(long, default_value_t = shared::DEFAULT_GRID_WIDTH)]
        width: i32,
        /// Grid height in cells
        #[clap(long, default_value_t = shared::DEFAULT_GRID_HEIGHT)]
        height: i32,
        /// Tick period in milliseconds
        #[clap(short, long, default_value_t = shared::DEFAULT_TICK_MS)]
        tick_ms: u64,
        /// Number of apples kept on the grid
        #[clap(short, long, default_value_t = shared::DEFAULT_APPLE_COUNT)]
        apples: usize,
        /// Initial snake length
        #[clap(short, long, default_value_t = shared::DEFAULT_SNAKE_LENGTH)]
        snake_length: usize,
    }

    env_logger::init();
    let args = Args::parse();

    if args.width < 1 || args.height < 1 {
        return Err("grid dimensions must be at least 1".into());
    }
    if args.tick_ms == 0 {
        return Err("tick period must be at least 1 ms".into());
    }

    let config = Config {
        world: WorldConfig {
            width: args.width,
            height: args.height,
            apple_count: args.apples,
            snake_length: args.snake_length,
        },
        tick_period: Duration::from_millis(args.tick_ms),
    };

    // Binding the port is the only fatal failure; everything afterwards
    // degrades per-session.
    let address = format!("{}:{}", args.host, args.port);
    let server = Server::bind(&address, config).await?;

    let server_handle = tokio::spawn(server.run());

    // Handle shutdown gracefully
    tokio::select! {
        result = server_handle => {
            if let Err(e) = result {
                eprintln!("Server task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
