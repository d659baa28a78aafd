fn main() {
    #[cfg(feature = "cli")]
    oxivcd::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("oxivcd: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
