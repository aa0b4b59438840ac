//! nginx reverse proxy client
//!
//! One `<host>.conf` file per published host in the conf.d directory, one
//! `server` block per proxied port. The files are the only record of what is
//! published: `routes()` parses them back so the publisher can diff against
//! them after a restart.

use crate::error::IngressError;
use crate::ingress_trait::ReverseProxy;
use crate::routes::{ProxyServer, Route, RouteTable};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

const CONF_SUFFIX: &str = ".conf";

/// Render one `server` block.
pub fn render_server(host: &str, ip: &str, server: &ProxyServer) -> String {
    format!(
        "server {{\n\n    listen       {};\n    server_name  {};\n\n    location / {{\n        proxy_pass {}://{}:{}/;\n    }}\n\n}}\n\n",
        server.external, host, server.protocol, ip, server.internal
    )
}

/// Render the whole config file for one host.
pub fn render_host(host: &str, route: &Route) -> String {
    route
        .servers
        .iter()
        .map(|server| render_server(host, &route.ip, server))
        .collect()
}

/// Parse a host config file back into a route.
///
/// Lines that cannot be understood are skipped, which makes the parsed
/// route differ from any expected one and forces a rewrite.
pub fn parse_host(text: &str) -> Route {
    let mut route = Route::default();
    let mut external = None;

    for line in text.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("listen") {
            external = rest.trim().trim_end_matches(';').trim().parse().ok();
        } else if let Some(rest) = line.strip_prefix("proxy_pass") {
            let target = rest.trim().trim_end_matches(';').trim();
            match (external, parse_proxy_pass(target)) {
                (Some(external), Some((protocol, ip, internal))) => {
                    route.servers.push(ProxyServer { protocol, external, internal });
                    route.ip = ip;
                }
                _ => debug!("Skipping unparsable proxy_pass {}", target),
            }
        }
    }

    route
}

/// `http://10.0.0.1:8080/` → (`http`, `10.0.0.1`, 8080)
fn parse_proxy_pass(target: &str) -> Option<(String, String, i32)> {
    let (protocol, rest) = target.split_once("://")?;
    let authority = rest.split('/').next()?;
    let (ip, port) = authority.rsplit_once(':')?;
    Some((protocol.to_string(), ip.to_string(), port.parse().ok()?))
}

/// nginx conf.d directory managed by this node.
#[derive(Debug, Clone)]
pub struct NginxProxy {
    conf_dir: PathBuf,
    reload_command: Vec<String>,
}

impl NginxProxy {
    /// Manage `*.conf` files in `conf_dir`, reloading with `systemctl reload nginx`.
    pub fn new(conf_dir: impl Into<PathBuf>) -> Self {
        Self {
            conf_dir: conf_dir.into(),
            reload_command: vec!["systemctl".to_string(), "reload".to_string(), "nginx".to_string()],
        }
    }

    /// Use a different command to reload the proxy.
    pub fn with_reload_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reload_command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Directory holding the host files.
    pub fn conf_dir(&self) -> &Path {
        &self.conf_dir
    }

    async fn conf_files(&self) -> Result<Vec<(String, PathBuf)>, IngressError> {
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.conf_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if let Some(host) = file_name.strip_suffix(CONF_SUFFIX) {
                files.push((host.to_string(), entry.path()));
            }
        }

        Ok(files)
    }

    async fn reload(&self) -> Result<(), IngressError> {
        let Some((program, args)) = self.reload_command.split_first() else {
            return Ok(());
        };

        let output = Command::new(program).args(args).output().await?;
        if !output.status.success() {
            return Err(IngressError::Command {
                command: self.reload_command.join(" "),
                detail: format!("{}: {}", output.status, String::from_utf8_lossy(&output.stderr).trim()),
            });
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl ReverseProxy for NginxProxy {
    async fn routes(&self) -> Result<RouteTable, IngressError> {
        let mut routes = RouteTable::new();

        for (host, path) in self.conf_files().await? {
            let text = tokio::fs::read_to_string(&path).await?;
            routes.insert(host, parse_host(&text));
        }

        Ok(routes)
    }

    async fn publish(&self, routes: &RouteTable) -> Result<(), IngressError> {
        for (host, path) in self.conf_files().await? {
            debug!("Removing proxy config for {}", host);
            tokio::fs::remove_file(&path).await?;
        }

        tokio::fs::create_dir_all(&self.conf_dir).await?;
        for (host, route) in routes {
            let path = self.conf_dir.join(format!("{}{}", host, CONF_SUFFIX));
            tokio::fs::write(&path, render_host(host, route)).await?;
        }

        info!("Published {} proxy host(s), reloading", routes.len());
        self.reload().await
    }
}
