pub fn run() -> anyhow::Result<()> {
    println!("complik {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
