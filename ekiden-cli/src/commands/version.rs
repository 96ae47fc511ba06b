use colored::*;

pub fn print_version() {
    println!(
        "{} {} ({}/{})",
        "ekiden".bold(),
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}
