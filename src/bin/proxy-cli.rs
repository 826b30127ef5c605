use clap::{Args, Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Management CLI for the reverse proxy admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8182")]
    url: String,

    /// Admin api key; omitted when empty.
    #[arg(short, long, default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check admin API status
    Status,
    /// Manage hosts
    #[command(subcommand)]
    Host(HostCmd),
    /// Manage listeners
    #[command(subcommand)]
    Listener(ListenerCmd),
    /// Manage backends
    #[command(subcommand)]
    Backend(BackendCmd),
    /// Manage servers of a backend
    #[command(subcommand)]
    Server(ServerCmd),
    /// Manage frontends
    #[command(subcommand)]
    Frontend(FrontendCmd),
    /// Manage middlewares of a frontend
    #[command(subcommand)]
    Middleware(MiddlewareCmd),
}

#[derive(Subcommand)]
enum HostCmd {
    Ls,
    Show { name: String },
    Upsert {
        #[arg(long)]
        name: String,
        #[arg(long)]
        default: bool,
    },
    Rm { name: String },
}

#[derive(Subcommand)]
enum ListenerCmd {
    Ls,
    Show { id: String },
    Upsert {
        #[arg(long)]
        id: String,
        #[arg(long, default_value = "http")]
        proto: String,
        #[arg(long, default_value = "tcp")]
        net: String,
        #[arg(long)]
        addr: String,
        #[arg(long, default_value = "")]
        scope: String,
    },
    Rm { id: String },
}

#[derive(Subcommand)]
enum BackendCmd {
    Ls,
    Show { id: String },
    Upsert {
        #[arg(long)]
        id: String,
        #[arg(long, default_value = "")]
        read_timeout: String,
        #[arg(long, default_value = "")]
        dial_timeout: String,
        #[arg(long, default_value_t = 0)]
        max_idle_conns_per_host: u32,
    },
    Rm { id: String },
}

#[derive(Args)]
struct ParentId {
    /// Backend id
    #[arg(long)]
    backend: String,
}

#[derive(Subcommand)]
enum ServerCmd {
    Ls(ParentId),
    Show {
        #[command(flatten)]
        parent: ParentId,
        id: String,
    },
    Upsert {
        #[command(flatten)]
        parent: ParentId,
        #[arg(long)]
        id: String,
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "")]
        ttl: String,
    },
    Rm {
        #[command(flatten)]
        parent: ParentId,
        id: String,
    },
}

#[derive(Subcommand)]
enum FrontendCmd {
    Ls,
    Show { id: String },
    Upsert {
        #[arg(long)]
        id: String,
        #[arg(long)]
        route: String,
        #[arg(long = "backend")]
        backend_id: String,
        #[arg(long, default_value = "")]
        failover_predicate: String,
        #[arg(long, default_value_t = 0)]
        max_body_bytes: i64,
        #[arg(long, default_value_t = 0)]
        max_mem_body_bytes: i64,
        #[arg(long)]
        pass_host_header: bool,
        #[arg(long)]
        trust_forward_header: bool,
        #[arg(long, default_value = "")]
        ttl: String,
    },
    Rm { id: String },
}

#[derive(Args)]
struct FrontendParent {
    /// Frontend id
    #[arg(long)]
    frontend: String,
}

#[derive(Subcommand)]
enum MiddlewareCmd {
    Ls(FrontendParent),
    Show {
        #[command(flatten)]
        parent: FrontendParent,
        id: String,
    },
    Upsert {
        #[command(flatten)]
        parent: FrontendParent,
        #[arg(long)]
        id: String,
        /// `cbreaker` or `buffer`
        #[arg(long = "type")]
        kind: String,
        #[arg(long, default_value_t = 0)]
        priority: i32,
        /// Middleware settings as JSON, e.g. '{"Condition":"NetworkErrorRatio() > 0.5"}'
        #[arg(long)]
        spec: String,
        #[arg(long, default_value = "")]
        ttl: String,
    },
    Rm {
        #[command(flatten)]
        parent: FrontendParent,
        id: String,
    },
}

struct Admin {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
}

impl Admin {
    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<(), Box<dyn std::error::Error>> {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.url.trim_end_matches('/'), path))
            .headers(self.headers.clone());
        if let Some(body) = body {
            req = req.json(&body);
        }
        print_response(req.send().await?).await
    }

    async fn get(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.call(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<(), Box<dyn std::error::Error>> {
        self.call(Method::POST, path, Some(body)).await
    }

    async fn delete(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.call(Method::DELETE, path, None).await
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    if !cli.key.is_empty() {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
        );
    }
    let admin = Admin {
        client: reqwest::Client::new(),
        url: cli.url,
        headers,
    };

    match cli.command {
        Commands::Status => admin.get("/v2/status").await?,

        Commands::Host(cmd) => match cmd {
            HostCmd::Ls => admin.get("/v2/hosts").await?,
            HostCmd::Show { name } => admin.get(&format!("/v2/hosts/{}", name)).await?,
            HostCmd::Upsert { name, default } => {
                let body = json!({"Host": {"Name": name, "Settings": {"Default": default}}});
                admin.post("/v2/hosts", body).await?
            }
            HostCmd::Rm { name } => admin.delete(&format!("/v2/hosts/{}", name)).await?,
        },

        Commands::Listener(cmd) => match cmd {
            ListenerCmd::Ls => admin.get("/v2/listeners").await?,
            ListenerCmd::Show { id } => admin.get(&format!("/v2/listeners/{}", id)).await?,
            ListenerCmd::Upsert { id, proto, net, addr, scope } => {
                let body = json!({"Listener": {
                    "Id": id,
                    "Protocol": proto,
                    "Address": {"Network": net, "Address": addr},
                    "Scope": scope,
                }});
                admin.post("/v2/listeners", body).await?
            }
            ListenerCmd::Rm { id } => admin.delete(&format!("/v2/listeners/{}", id)).await?,
        },

        Commands::Backend(cmd) => match cmd {
            BackendCmd::Ls => admin.get("/v2/backends").await?,
            BackendCmd::Show { id } => admin.get(&format!("/v2/backends/{}", id)).await?,
            BackendCmd::Upsert { id, read_timeout, dial_timeout, max_idle_conns_per_host } => {
                let body = json!({"Backend": {
                    "Id": id,
                    "Type": "http",
                    "Settings": {
                        "Timeouts": {"Read": read_timeout, "Dial": dial_timeout},
                        "KeepAlive": {"MaxIdleConnsPerHost": max_idle_conns_per_host},
                    },
                }});
                admin.post("/v2/backends", body).await?
            }
            BackendCmd::Rm { id } => admin.delete(&format!("/v2/backends/{}", id)).await?,
        },

        Commands::Server(cmd) => match cmd {
            ServerCmd::Ls(p) => admin.get(&format!("/v2/backends/{}/servers", p.backend)).await?,
            ServerCmd::Show { parent, id } => {
                admin.get(&format!("/v2/backends/{}/servers/{}", parent.backend, id)).await?
            }
            ServerCmd::Upsert { parent, id, url, ttl } => {
                let body = json!({"Server": {"Id": id, "URL": url}, "TTL": ttl});
                admin.post(&format!("/v2/backends/{}/servers", parent.backend), body).await?
            }
            ServerCmd::Rm { parent, id } => {
                admin.delete(&format!("/v2/backends/{}/servers/{}", parent.backend, id)).await?
            }
        },

        Commands::Frontend(cmd) => match cmd {
            FrontendCmd::Ls => admin.get("/v2/frontends").await?,
            FrontendCmd::Show { id } => admin.get(&format!("/v2/frontends/{}", id)).await?,
            FrontendCmd::Upsert {
                id,
                route,
                backend_id,
                failover_predicate,
                max_body_bytes,
                max_mem_body_bytes,
                pass_host_header,
                trust_forward_header,
                ttl,
            } => {
                let body = json!({
                    "Frontend": {
                        "Id": id,
                        "Route": route,
                        "Type": "http",
                        "BackendId": backend_id,
                        "Settings": {
                            "Limits": {
                                "MaxBodyBytes": max_body_bytes,
                                "MaxMemBodyBytes": max_mem_body_bytes,
                            },
                            "FailoverPredicate": failover_predicate,
                            "PassHostHeader": pass_host_header,
                            "TrustForwardHeader": trust_forward_header,
                        },
                    },
                    "TTL": ttl,
                });
                admin.post("/v2/frontends", body).await?
            }
            FrontendCmd::Rm { id } => admin.delete(&format!("/v2/frontends/{}", id)).await?,
        },

        Commands::Middleware(cmd) => match cmd {
            MiddlewareCmd::Ls(p) => {
                admin.get(&format!("/v2/frontends/{}/middlewares", p.frontend)).await?
            }
            MiddlewareCmd::Show { parent, id } => {
                admin
                    .get(&format!("/v2/frontends/{}/middlewares/{}", parent.frontend, id))
                    .await?
            }
            MiddlewareCmd::Upsert { parent, id, kind, priority, spec, ttl } => {
                let settings: Value = serde_json::from_str(&spec)?;
                let body = json!({
                    "Middleware": {
                        "Id": id,
                        "Priority": priority,
                        "Type": kind,
                        "Middleware": settings,
                    },
                    "TTL": ttl,
                });
                admin
                    .post(&format!("/v2/frontends/{}/middlewares", parent.frontend), body)
                    .await?
            }
            MiddlewareCmd::Rm { parent, id } => {
                admin
                    .delete(&format!("/v2/frontends/{}/middlewares/{}", parent.frontend, id))
                    .await?
            }
        },
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
