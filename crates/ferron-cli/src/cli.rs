//! Clap CLI definitions for Ferron.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  ferron serve --listen 127.0.0.1:7400      Publish the built-in node context
  ferron inspect 127.0.0.1:7400             List remote contexts and members
  ferron call 127.0.0.1:7400 node echo '\"hi\"'  Invoke a remote method";

/// Ferron — remote objects between peer processes.
#[derive(Parser)]
#[command(name = "ferron", version, about = "Ferron remote-object node", after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a node and publish the built-in `node` context until Ctrl+C.
    Serve {
        /// Listen address (overrides the config file).
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Connect to a node and print its contexts with member signatures.
    Inspect {
        /// Address of the remote node.
        addr: SocketAddr,
    },
    /// Invoke a method or read/write a property on a remote context.
    Call {
        /// Address of the remote node.
        addr: SocketAddr,
        /// Published context name.
        context: String,
        /// Method or property name.
        member: String,
        /// Arguments as JSON values; bare words are sent as strings.
        args: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_call_with_args() {
        let cli = Cli::parse_from([
            "ferron", "--config", "/tmp/f.toml", "call", "127.0.0.1:7400", "node", "echo", "[1,2]",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/f.toml")));
        match cli.command {
            Commands::Call {
                addr,
                context,
                member,
                args,
            } => {
                assert_eq!(addr.port(), 7400);
                assert_eq!(context, "node");
                assert_eq!(member, "echo");
                assert_eq!(args, vec!["[1,2]".to_string()]);
            }
            _ => panic!("Expected call"),
        }
    }

    #[test]
    fn test_parse_serve_listen() {
        let cli = Cli::parse_from(["ferron", "serve", "--listen", "0.0.0.0:9000"]);
        assert!(matches!(
            cli.command,
            Commands::Serve { listen: Some(addr) } if addr.port() == 9000
        ));
    }
}
