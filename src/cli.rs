use clap::{Parser, Subcommand};

/// P0cit gateway: resilient, normalizing front for the P0cit REST API
#[derive(Parser)]
#[command(name = "p0cit-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Port to bind (defaults to GATEWAY_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the endpoint candidates for a resource, in the order they are tried
    Resolve {
        /// Logical resource, e.g. `projects/42`
        resource: String,
    },

    /// GET a resource as the service account and print the normalized JSON
    Fetch {
        /// Logical resource, e.g. `users` or `projects/42`
        resource: String,
        /// Extra query parameters as key=value
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["p0cit-gateway"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_fetch_params() {
        let cli = Cli::try_parse_from([
            "p0cit-gateway",
            "fetch",
            "users",
            "-p",
            "role=CLIENT",
            "--param",
            "limit=10",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Fetch { resource, params }) => {
                assert_eq!(resource, "users");
                assert_eq!(
                    params,
                    vec![
                        ("role".to_string(), "CLIENT".to_string()),
                        ("limit".to_string(), "10".to_string())
                    ]
                );
            }
            _ => panic!("expected fetch"),
        }
    }

    #[test]
    fn test_bad_param_is_rejected() {
        assert!(Cli::try_parse_from(["p0cit-gateway", "fetch", "users", "-p", "oops"]).is_err());
    }
}
