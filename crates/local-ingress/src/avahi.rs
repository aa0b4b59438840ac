//! avahi CNAME registrar
//!
//! Publishes `<name>.local` CNAME records pointing at this node through the
//! avahi daemon's D-Bus API. All records live in a single entry group which
//! is freed and rebuilt on every change.

use crate::error::IngressError;
use crate::ingress_trait::NameRegistrar;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};
use zbus::zvariant::OwnedObjectPath;
use zbus::{Connection, Proxy};

const AVAHI_NAME: &str = "org.freedesktop.Avahi";
const AVAHI_SERVER_PATH: &str = "/";
const AVAHI_SERVER_INTERFACE: &str = "org.freedesktop.Avahi.Server";
const AVAHI_GROUP_INTERFACE: &str = "org.freedesktop.Avahi.EntryGroup";

const IF_UNSPEC: i32 = -1;
const PROTO_UNSPEC: i32 = -1;
const CLASS_IN: u16 = 0x01;
const TYPE_CNAME: u16 = 0x05;
const TTL: u32 = 15;
const MAX_LABEL: usize = 63;

/// Non-empty labels of `name`. Names are not IDNA-encoded, so every label
/// must be ASCII and at most 63 bytes.
fn labels(name: &str) -> Result<Vec<&str>, IngressError> {
    let invalid = |reason: String| IngressError::InvalidName { name: name.to_string(), reason };

    let labels: Vec<&str> = name.split('.').filter(|label| !label.is_empty()).collect();
    for label in &labels {
        if !label.is_ascii() {
            return Err(invalid(format!("label {:?} is not ASCII", label)));
        }
        if label.len() > MAX_LABEL {
            return Err(invalid(format!("label {:?} is longer than {} bytes", label, MAX_LABEL)));
        }
    }
    Ok(labels)
}

/// Wire-format a host name: length-prefixed labels ending with a zero byte.
pub fn encode_rdata(name: &str) -> Result<Vec<u8>, IngressError> {
    let mut rdata = Vec::with_capacity(name.len() + 2);
    for label in labels(name)? {
        rdata.push(label.len() as u8);
        rdata.extend_from_slice(label.as_bytes());
    }
    rdata.push(0);
    Ok(rdata)
}

/// Normalize a CNAME for avahi: drop empty labels, join with dots.
pub fn encode_cname(name: &str) -> Result<String, IngressError> {
    Ok(labels(name)?.join("."))
}

/// Registers CNAMEs with the local avahi daemon.
///
/// Connects to the system bus on first use.
#[derive(Debug, Default)]
pub struct AvahiRegistrar {
    connection: Option<Connection>,
    group: Option<OwnedObjectPath>,
}

impl AvahiRegistrar {
    /// Create a registrar; nothing is contacted until the first `register`.
    pub fn new() -> Self {
        Self::default()
    }

    async fn connection(&mut self) -> Result<Connection, IngressError> {
        if let Some(connection) = &self.connection {
            return Ok(connection.clone());
        }

        let connection = Connection::system().await?;
        self.connection = Some(connection.clone());
        Ok(connection)
    }

    async fn free_group(&mut self, connection: &Connection) {
        let Some(path) = self.group.take() else {
            return;
        };

        let result = async {
            let group = Proxy::new(connection, AVAHI_NAME, path.as_str(), AVAHI_GROUP_INTERFACE).await?;
            let _: () = group.call("Free", &()).await?;
            Ok::<(), zbus::Error>(())
        }
        .await;

        if let Err(e) = result {
            warn!("Failed to free avahi entry group {}: {}", path.as_str(), e);
        }
    }
}

#[async_trait::async_trait]
impl NameRegistrar for AvahiRegistrar {
    async fn register(&mut self, cnames: &BTreeSet<String>) -> Result<(), IngressError> {
        // Rejected before the current group is freed.
        let encoded = cnames.iter().map(|cname| encode_cname(cname)).collect::<Result<Vec<_>, _>>()?;

        let connection = self.connection().await?;
        self.free_group(&connection).await;

        if cnames.is_empty() {
            info!("No CNAMEs to publish");
            return Ok(());
        }

        let server = Proxy::new(&connection, AVAHI_NAME, AVAHI_SERVER_PATH, AVAHI_SERVER_INTERFACE).await?;
        let fqdn: String = server.call("GetHostNameFqdn", &()).await?;
        let rdata = encode_rdata(&fqdn)?;

        let path: OwnedObjectPath = server.call("EntryGroupNew", &()).await?;
        let group = Proxy::new(&connection, AVAHI_NAME, path.as_str(), AVAHI_GROUP_INTERFACE).await?;

        for cname in encoded {
            debug!("Adding CNAME {} -> {}", cname, fqdn);
            let record = (
                IF_UNSPEC,
                PROTO_UNSPEC,
                0u32,
                cname,
                CLASS_IN,
                TYPE_CNAME,
                TTL,
                rdata.clone(),
            );
            let _: () = group.call("AddRecord", &record).await?;
        }

        let _: () = group.call("Commit", &()).await?;
        self.group = Some(path.clone());

        info!("Published {} CNAME(s) for {}", cnames.len(), fqdn);
        Ok(())
    }
}
