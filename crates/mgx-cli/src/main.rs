//! 🚀 mgx-cli — the front door, the bouncer, the maitre d' of the migration.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary crate is the thin CLI wrapper that loads config,
//! sets up logging, overlays the flags, and then lets the real code do the
//! heavy lifting. Like a manager. 🦆
//!
//! Exit codes are the contract with deployment automation:
//! 0 = done/nothing to do, 1 = migration failure, 2 = preflight gate closed,
//! 3 = pre-deploy check says the upgrade is blocked, 4 = mandatory security
//! reinitialization failed.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use mgx::app_config::MigrationMode;

/// 🎛️ The flags. Everything here can also come from config/env (MGX_*);
/// flags win, because the human typing them is standing closest to the fire.
#[derive(Debug, Parser)]
#[command(name = "mgx", about = "Migrate legacy-format indices before the engine upgrade lands")]
struct Cli {
    /// Path to a TOML config file (optional; MGX_* env vars always apply)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run mode: manual, migration, or pre-deploy-check
    #[arg(long)]
    mode: Option<MigrationMode>,

    /// 👻 Report what would happen; mutate nothing
    #[arg(long)]
    dry_run: bool,

    /// Skip the valid-backup preflight gate
    #[arg(long)]
    skip_backup: bool,

    /// Skip the disk-space preflight check
    #[arg(long)]
    skip_space_check: bool,

    /// Skip the security-subsystem reinitialization
    #[arg(long)]
    skip_security_reinit: bool,

    /// Skip the post-reinit credential restoration
    #[arg(long)]
    skip_credential_restore: bool,
}

/// 🚀 main() — where it all begins. The genesis. The big bang.
/// The "I pressed F5 and held my breath" moment.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse flags
/// 3. Load config (the moment of truth)
/// 4. Overlay flags onto config (the human outranks the file)
/// 5. Run the thing (send it and pray 🙏)
/// 6. Exit with the code automation is waiting for
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 Set up tracing — because println! debugging is a lifestyle choice
    // we're trying to move past, like flip phones and cargo shorts
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // 🔒 Validate the config file exists before we get too emotionally attached
    let config_path = match &cli.config {
        Some(path) => {
            let exists = path.try_exists().context(format!(
                "💀 Configuration file may not exist, couldn't find it. Double check that it exists, \
                 or maybe, it's an issue with pwd/cwd and relative paths. In that case, use an \
                 absolute path, to be absolutely certain. Was checking here: '{}'",
                path.display()
            ))?;
            if exists { Some(path.as_path()) } else { None }
        }
        None => None, // 💤 env-vars-only mode. minimalist. we respect it.
    };

    // 🔧 Load the config — this is the moment where we find out if the TOML is valid
    // or if someone put a tab where a space should be (looking at you, Kevin)
    let mut app_config = mgx::app_config::load_config(config_path)
        .context("💀 Couldn't load the configuration. Take a look at the file and the MGX_* env vars, make sure you didn't forget something obvious")?;

    // 🎛️ flags outrank the file
    if let Some(mode) = cli.mode {
        app_config.run.mode = mode;
    }
    app_config.run.dry_run |= cli.dry_run;
    app_config.run.skip_backup |= cli.skip_backup;
    app_config.run.skip_space_check |= cli.skip_space_check;
    app_config.run.skip_security_reinit |= cli.skip_security_reinit;
    app_config.run.skip_credential_restore |= cli.skip_credential_restore;

    // 🚀 SEND IT. No take-backs. This is not a drill.
    match mgx::run(app_config).await {
        Ok(code) => {
            // ✅ a code, even a sad one, means the run ended on its own terms
            std::process::exit(code.code());
        }
        Err(err) => {
            // 💀 Error handling: the part where we find out what went wrong
            // and print it in a way that's helpful at 3am
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion of sadness, one tear-jerking layer at a time
            let mut the_vibes_are_giving_connection_issues = false;
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
                // -- 🕵️ sniff the cause like a truffle pig hunting for connection problems
                let cause_str = cause.to_string();
                if cause_str.contains("error sending request")
                    || cause_str.contains("connection refused")
                    || cause_str.contains("Connection refused")
                    || cause_str.contains("tcp connect error")
                    || cause_str.contains("dns error")
                {
                    the_vibes_are_giving_connection_issues = true;
                }
            }

            // -- 📡 if it smells like a connection problem, it's probably a connection problem
            // -- like when your wifi icon has full bars but nothing loads
            if the_vibes_are_giving_connection_issues {
                error!(
                    "🔧 hint: looks like a service isn't reachable. \
                    Double-check that the cluster (or the backup daemon / credential adapter) \
                    is actually running and that the configured URL is right. If you're using \
                    Docker, try: `docker ps` to see what's up, or `docker compose up -d` to \
                    resurrect it. Even servers need a nudge sometimes. ☕"
                );
            }

            // 🗑️ Exit with prejudice. Process exitus maximus.
            std::process::exit(mgx::ExitCode::Failure.code());
        }
    }
}
