//! huddled - real-time session synchronization hub
//!
//! Installed from the workspace root; see `huddled --help`.

fn main() -> anyhow::Result<()> {
    huddled::cli::main()
}
