//! Pipevisor plugin manager
//!
//! Usage:
//!   pipevisor-plugin list [-v]                    # List installed plugins
//!   pipevisor-plugin update                       # Minor, conservative update of all
//!   pipevisor-plugin update --level patch NAME    # Patch-level update of one plugin
//!   pipevisor-plugin update --no-conservative     # Let dependencies move too

use pipevisor::plugin::PluginCli;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli: PluginCli = argh::from_env();
    std::process::exit(cli.run().await);
}
