//! huddled - real-time session synchronization hub

fn main() -> anyhow::Result<()> {
    huddled::cli::main()
}
