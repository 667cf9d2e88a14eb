//! CLI argument definitions using clap.

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use reqwest::Method;

use crate::core::context::{Context, QueryParams, Scalar};

/// Cached, authenticated access to the school-management API.
#[derive(Parser, Debug)]
#[command(name = "edugate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    // === Global flags ===
    /// API base URL
    #[arg(long, value_name = "URL", global = true)]
    pub base_url: Option<String>,

    /// Output format
    #[arg(long, value_enum, global = true)]
    pub format: Option<OutputFormat>,

    /// Shorthand for --format json
    #[arg(long, global = true)]
    pub json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Emit JSON logs to stderr
    #[arg(long, global = true)]
    pub json_output: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read an endpoint through the cache
    Get(GetArgs),

    /// Send a write (POST, PUT, PATCH, DELETE) and invalidate affected cache entries
    Send(SendArgs),

    /// Inspect or clear the local response cache
    #[command(subcommand)]
    Cache(CacheCommand),

    /// Manage the stored session
    #[command(subcommand)]
    Auth(AuthCommand),

    /// Show configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Tags identifying who a request is made for.
#[derive(Args, Debug, Clone, Default)]
pub struct ContextArgs {
    #[arg(long, value_name = "ID")]
    pub user: Option<String>,

    #[arg(long, value_name = "ID")]
    pub institute: Option<String>,

    #[arg(long, value_name = "ID")]
    pub class: Option<String>,

    #[arg(long, value_name = "ID")]
    pub subject: Option<String>,

    #[arg(long, value_name = "ROLE")]
    pub role: Option<String>,
}

impl ContextArgs {
    #[must_use]
    pub fn to_context(&self) -> Context {
        let mut context = Context::new();
        if let Some(id) = &self.user {
            context = context.with_user(id);
        }
        if let Some(id) = &self.institute {
            context = context.with_institute(id);
        }
        if let Some(id) = &self.class {
            context = context.with_class(id);
        }
        if let Some(id) = &self.subject {
            context = context.with_subject(id);
        }
        if let Some(role) = &self.role {
            context = context.with_role(role);
        }
        context
    }
}

/// Arguments for the `get` command.
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Endpoint path, e.g. /students
    pub endpoint: String,

    /// Query parameter (repeatable)
    #[arg(long = "param", short = 'p', value_name = "NAME=VALUE", value_parser = QueryParams::parse_pair)]
    pub params: Vec<(String, Scalar)>,

    /// Cache lifetime in minutes
    #[arg(long, value_name = "MINUTES")]
    pub ttl: Option<u64>,

    /// Bypass the cache and the cooldown
    #[arg(long)]
    pub refresh: bool,

    /// Serve a fresh cached copy and refresh it in the background
    #[arg(long)]
    pub swr: bool,

    #[command(flatten)]
    pub context: ContextArgs,
}

impl GetArgs {
    #[must_use]
    pub fn query_params(&self) -> Option<QueryParams> {
        if self.params.is_empty() {
            return None;
        }
        Some(self.params.iter().cloned().collect())
    }
}

/// HTTP method accepted by `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPER")]
pub enum WriteMethod {
    Post,
    Put,
    Patch,
    Delete,
}

impl From<WriteMethod> for Method {
    fn from(method: WriteMethod) -> Self {
        match method {
            WriteMethod::Post => Self::POST,
            WriteMethod::Put => Self::PUT,
            WriteMethod::Patch => Self::PATCH,
            WriteMethod::Delete => Self::DELETE,
        }
    }
}

/// Arguments for the `send` command.
#[derive(Args, Debug)]
pub struct SendArgs {
    #[arg(value_enum, ignore_case = true)]
    pub method: WriteMethod,

    /// Endpoint path, e.g. /students/42
    pub endpoint: String,

    /// JSON body
    #[arg(long, value_name = "JSON", conflicts_with_all = ["form", "file"])]
    pub data: Option<String>,

    /// Multipart text field (repeatable)
    #[arg(long, value_name = "NAME=VALUE")]
    pub form: Vec<String>,

    /// Multipart file field (repeatable)
    #[arg(long, value_name = "FIELD=PATH")]
    pub file: Vec<String>,

    #[command(flatten)]
    pub context: ContextArgs,
}

/// Cache subcommands.
#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Entry counts and size
    Stats,

    /// Remove cached entries
    #[command(group = clap::ArgGroup::new("scope").required(true).args(["user", "institute", "all"]))]
    Clear {
        /// Entries tagged with this user
        #[arg(long, value_name = "ID")]
        user: Option<String>,

        /// Entries tagged with this institute
        #[arg(long, value_name = "ID")]
        institute: Option<String>,

        /// Everything
        #[arg(long)]
        all: bool,
    },

    /// Delete entries past their retention window
    Prune,
}

/// Session subcommands.
#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Show whether a token is stored and when it expires
    Status,

    /// Store an access token
    SetToken {
        token: String,
    },

    /// Forget the token and the user's cached entries
    Logout {
        /// Also clear cached entries for this user
        #[arg(long, value_name = "ID")]
        user: Option<String>,
    },
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the resolved configuration
    Show,

    /// Print the config file path
    Path,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}
