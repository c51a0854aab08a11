use clap::{Args, Parser, Subcommand};
use joinstr_api::{
    Config, NodeConfig, SurrealDbConfig,
    constants::{
        DEFAULT_BITCOIN_NETWORK, DEFAULT_FEE_API_BASE_URL, DEFAULT_NODE_PORT, DEFAULT_NODE_URL,
        DEFAULT_NOSTR_RELAY, DEFAULT_READINESS_INTERVAL_SECONDS, DEFAULT_RELAY_TIMEOUT_SECONDS,
    },
};
use joinstr_core::{constants::DEFAULT_POOL_TIMEOUT_SECONDS, protocol::EventKind};

#[derive(Debug, Parser)]
#[command(name = "joinstr")]
#[command(about = "Coordinate coinjoin pools over a Nostr relay", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub config: CliConfig,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Announce a new pool and register an output in it
    CreatePool {
        /// Amount every peer puts in, in BTC
        #[arg(long)]
        denomination: f64,
        /// Number of participants including us
        #[arg(long, default_value_t = 5)]
        peers: u32,
    },
    /// List open pools announced by others
    ListPools,
    /// List pools we created or joined
    MyPools,
    /// Ask an open pool for its credentials and register an output
    Join {
        #[arg(long)]
        pool_id: String,
    },
    /// Register an additional output address in a local pool
    RegisterOutput {
        #[arg(long)]
        pool_id: String,
        #[arg(long)]
        address: String,
    },
    /// Register a signed PSBT in a local pool
    RegisterInput {
        #[arg(long)]
        pool_id: String,
        #[arg(long)]
        psbt: String,
    },
    /// Show the state of a local pool
    Status {
        #[arg(long)]
        pool_id: String,
    },
    /// Answer join requests and follow registrations until interrupted.
    /// Picks up pools added by other commands sharing a SurrealDB server,
    /// the embedded database is locked by a running watch.
    Watch,
    /// Record a broadcast coinjoin of a local pool
    Finish {
        #[arg(long)]
        pool_id: String,
        #[arg(long)]
        psbt: String,
        #[arg(long)]
        tx: String,
    },
    /// Forget a local pool
    Remove {
        #[arg(long)]
        pool_id: String,
    },
    /// List completed coinjoins
    History,
}

#[derive(Debug, Clone, Args)]
pub struct CliConfig {
    #[arg(long, global = true, env = "NOSTR_RELAY", default_value = DEFAULT_NOSTR_RELAY)]
    pub nostr_relay: String,
    #[arg(long, global = true, env = "BITCOIN_NETWORK", default_value = DEFAULT_BITCOIN_NETWORK)]
    pub bitcoin_network: String,
    #[arg(long, global = true, env = "NODE_URL", default_value = DEFAULT_NODE_URL)]
    pub node_url: String,
    #[arg(long, global = true, env = "NODE_PORT", default_value_t = DEFAULT_NODE_PORT)]
    pub node_port: u16,
    #[arg(long, global = true, env = "NODE_USER", default_value = "")]
    pub node_user: String,
    #[arg(long, global = true, env = "NODE_PASSWORD", default_value = "", hide_env_values = true)]
    pub node_password: String,
    #[arg(long, global = true, env = "NODE_WALLET", default_value = "")]
    pub node_wallet: String,
    #[arg(long, global = true, env = "SURREAL_DB_CONNECTION")]
    pub surreal_db_connection: Option<String>,
    #[arg(long, global = true, env = "SURREAL_DB_NAMESPACE")]
    pub surreal_db_namespace: Option<String>,
    #[arg(long, global = true, env = "SURREAL_DB_DATABASE")]
    pub surreal_db_database: Option<String>,
    #[arg(long, global = true, env = "POOL_TIMEOUT_SECS", default_value_t = DEFAULT_POOL_TIMEOUT_SECONDS)]
    pub pool_timeout_secs: u64,
    #[arg(long, global = true, env = "READINESS_INTERVAL_SECS", default_value_t = DEFAULT_READINESS_INTERVAL_SECONDS)]
    pub readiness_interval_secs: u64,
    #[arg(long, global = true, env = "RELAY_TIMEOUT_SECS", default_value_t = DEFAULT_RELAY_TIMEOUT_SECONDS)]
    pub relay_timeout_secs: u64,
    #[arg(long, global = true, env = "FEE_API_BASE_URL", default_value = DEFAULT_FEE_API_BASE_URL)]
    pub fee_api_base_url: String,
    /// Announce and discover pools with the test event kind
    #[arg(long, global = true, env = "TEST_ANNOUNCEMENTS")]
    pub test_announcements: bool,
}

impl From<CliConfig> for Config {
    fn from(cli: CliConfig) -> Self {
        let default_db = SurrealDbConfig::default();
        Config {
            nostr_relay: cli.nostr_relay,
            bitcoin_network: cli.bitcoin_network,
            node_config: NodeConfig {
                url: cli.node_url,
                user_name: cli.node_user,
                password: cli.node_password,
                port: cli.node_port,
                selected_wallet: cli.node_wallet,
            },
            db_config: SurrealDbConfig {
                connection_string: cli
                    .surreal_db_connection
                    .unwrap_or(default_db.connection_string),
                namespace: cli.surreal_db_namespace.unwrap_or(default_db.namespace),
                database: cli.surreal_db_database.unwrap_or(default_db.database),
            },
            pool_timeout_secs: cli.pool_timeout_secs,
            readiness_interval_secs: cli.readiness_interval_secs,
            announcement_kind: if cli.test_announcements {
                EventKind::TestJoinStr
            } else {
                EventKind::JoinStr
            },
            relay_timeout_secs: cli.relay_timeout_secs,
            fee_api_base_url: cli.fee_api_base_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["joinstr", "list-pools"]).unwrap();
        assert!(matches!(cli.command, Command::ListPools));
        let cfg = Config::from(cli.config);
        assert_eq!(cfg.pool_timeout_secs, 600);
        assert_eq!(cfg.announcement_kind, EventKind::JoinStr);
        assert_eq!(cfg.db_config.database, SurrealDbConfig::default().database);
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::try_parse_from([
            "joinstr",
            "create-pool",
            "--denomination",
            "0.001",
            "--peers",
            "3",
            "--nostr-relay",
            "ws://127.0.0.1:7777",
            "--node-wallet",
            "coinjoin",
            "--test-announcements",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::CreatePool { denomination, peers: 3 } if denomination == 0.001
        ));
        let cfg = Config::from(cli.config);
        assert_eq!(cfg.nostr_relay, "ws://127.0.0.1:7777");
        assert_eq!(cfg.node_config.selected_wallet, "coinjoin");
        assert_eq!(cfg.announcement_kind, EventKind::TestJoinStr);
    }

    #[rstest]
    #[case(&["joinstr", "join"])]
    #[case(&["joinstr", "create-pool"])]
    #[case(&["joinstr", "register-output", "--pool-id", "abc"])]
    fn test_missing_arguments(#[case] args: &[&str]) {
        assert!(Cli::try_parse_from(args).is_err());
    }
}
