use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Prometheus exporter that publishes per-hop mtr packet counters
#[derive(Parser, Debug, Clone)]
#[command(name = "mtr_exporter")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the YAML configuration file
    #[arg(long = "config.file", default_value = "mtr.yaml")]
    pub config_file: PathBuf,

    /// Address to listen on for HTTP requests (":port" binds all interfaces)
    #[arg(long = "web.listen-address", default_value = ":9116")]
    pub listen_address: String,

    /// Log filter when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long = "log.level", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Resolve the listen address into a bindable socket address
    pub fn listen_addr(&self) -> Result<SocketAddr, String> {
        parse_listen_address(&self.listen_address)
    }

    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        self.listen_addr()?;

        let level = self.log_level.to_lowercase();
        if !["error", "warn", "info", "debug", "trace"].contains(&level.as_str()) {
            return Err(format!(
                "Unknown log level: {}. Use error, warn, info, debug, or trace",
                self.log_level
            ));
        }

        Ok(())
    }
}

fn parse_listen_address(addr: &str) -> Result<SocketAddr, String> {
    if let Some(port) = addr.strip_prefix(':') {
        let port: u16 = port
            .parse()
            .map_err(|_| format!("Invalid port in listen address: {}", addr))?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }

    addr.parse()
        .map_err(|_| format!("Invalid listen address: {}", addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["mtr_exporter"]);
        assert_eq!(args.config_file, PathBuf::from("mtr.yaml"));
        assert_eq!(args.listen_address, ":9116");
        assert_eq!(args.log_level, "info");
        assert_eq!(args.listen_addr().unwrap(), "0.0.0.0:9116".parse().unwrap());
    }

    #[test]
    fn test_dotted_flags() {
        let args = parse(&[
            "mtr_exporter",
            "--config.file",
            "/etc/mtr.yaml",
            "--web.listen-address",
            "127.0.0.1:9200",
            "--log.level",
            "debug",
        ]);
        assert_eq!(args.config_file, PathBuf::from("/etc/mtr.yaml"));
        assert_eq!(args.listen_addr().unwrap(), "127.0.0.1:9200".parse().unwrap());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_ipv6_listen_address() {
        assert_eq!(
            parse_listen_address("[::1]:9116").unwrap(),
            "[::1]:9116".parse().unwrap()
        );
    }

    #[test]
    fn test_invalid_listen_address() {
        assert!(parse_listen_address(":http").is_err());
        assert!(parse_listen_address("localhost").is_err());
        assert!(parse_listen_address(":70000").is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let args = parse(&["mtr_exporter", "--log.level", "loud"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_version_flag() {
        let err = Args::try_parse_from(["mtr_exporter", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
