mod logging;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

/// One day.
pub const MAX_NONCE_TTL_SECS: u64 = 86_400;

pub const DEFAULT_PORT: u16 = 5555;

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("dexgate")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Path to the YAML configuration file")
                .env("DEXGATE_CONFIG")
                .required(true),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("5555")
                .env("DEXGATE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("nonce-ttl")
                .long("nonce-ttl")
                .help("Seconds a login state nonce stays valid, at most one day")
                .default_value("600")
                .env("DEXGATE_NONCE_TTL")
                .value_parser(clap::value_parser!(u64).range(1..=MAX_NONCE_TTL_SECS)),
        );

    logging::with_args(command)
}
