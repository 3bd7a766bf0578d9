//! `marsh-sample` — démonstration de l’aller-retour
//!
//! Compile `print('Marshalled code')`, sérialise l’unité, la relit depuis les
//! octets puis l’exécute : une seule ligne sur stdout. Code de sortie 1 si une
//! étape échoue (message sur stderr).

#![forbid(unsafe_code)]

use std::process::ExitCode;

use anyhow::{ensure, Context, Result};
use log::{debug, info, log_enabled, Level};

use marsh::{disasm, Session, SessionOptions};

const SOURCE: &str = "print('Marshalled code')";
const UNIT_NAME: &str = "sample";
const MODE: &str = "exec";

// ──────────────────────────── main ────────────────────────────

fn main() -> ExitCode {
    init_logger();
    if let Err(e) = real_main() {
        eprintln!("error: {e:#}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

/// Logs sur stderr, filtrés par `RUST_LOG` (défaut `warn`).
fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_secs()
        .try_init();
}

fn real_main() -> Result<()> {
    let mut session = Session::new(SessionOptions::default());

    let unit = session.compile(SOURCE, UNIT_NAME, MODE).context("compilation de l'exemple")?;
    for d in session.take_diagnostics() {
        info!("{d}");
    }

    let bytes = session.serialize(&unit).context("sérialisation de l'unité")?;
    ensure!(!bytes.is_empty(), "la sérialisation n'a produit aucun octet");
    debug!("serialized `{UNIT_NAME}`: {} bytes", bytes.len());

    let loaded = session.deserialize(&bytes).context("désérialisation de l'unité")?;
    if log_enabled!(Level::Debug) {
        debug!("\n{}", disasm::disassemble_full(&loaded, UNIT_NAME));
    }

    session.execute(&loaded).context("exécution de l'unité")?;
    Ok(())
}
