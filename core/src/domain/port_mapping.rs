//! Port specs and their resolution against services and pods.
//!
//! A port spec is what the user writes: `8080`, `9000:http` or `:http`. The
//! remote side may name a port; resolution turns it into the number the pod
//! actually listens on, following a service's `targetPort` table when the
//! tunnel was requested through a service.

use std::fmt;

use super::workload::{Service, TargetPort, Workload};
use crate::error::{Error, Result};

/// Local port used when a port spec names none.
pub const DEFAULT_LOCAL_PORT: &str = "9999";

/// A local/remote port pair, kept textual so `http:http` can stand for
/// "the same number on both sides" until the name is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub local: String,
    pub remote: String,
}

impl PortMapping {
    /// Parses `remote`, `local:remote` or `:remote`.
    ///
    /// A bare remote gets `default_local`; an empty local becomes `0`, which
    /// lets the listener pick a free port.
    pub fn parse(spec: &str, default_local: &str) -> Result<Self> {
        let spec = spec.trim();
        let parts: Vec<&str> = spec.split(':').collect();

        let (local, remote) = match parts.as_slice() {
            [remote] => (default_local.to_string(), remote.to_string()),
            [local, remote] if local.is_empty() => ("0".to_string(), remote.to_string()),
            [local, remote] => (local.to_string(), remote.to_string()),
            _ => {
                return Err(Error::Resolution(format!(
                    "invalid port specification '{}'",
                    spec
                )))
            }
        };

        if remote.is_empty() {
            return Err(Error::Resolution(format!(
                "no remote port in '{}'",
                spec
            )));
        }

        if let Some(n) = as_number(&remote)? {
            if n == 0 {
                return Err(Error::Resolution("remote port must be > 0".to_string()));
            }
        }

        // A named local port only makes sense as the `name:name` shorthand.
        if as_number(&local)?.is_none() && local != remote {
            return Err(Error::Resolution(format!(
                "local port '{}' must be a number",
                local
            )));
        }

        Ok(Self { local, remote })
    }

    /// The local port as a number. Fails while it is still a name.
    pub fn local_port(&self) -> Result<u16> {
        as_number(&self.local)?.ok_or_else(|| {
            Error::Resolution(format!("local port '{}' is not resolved", self.local))
        })
    }

    /// The remote port as a number. Fails while it is still a name.
    pub fn remote_port(&self) -> Result<u16> {
        as_number(&self.remote)?.ok_or_else(|| {
            Error::Resolution(format!("remote port '{}' is not resolved", self.remote))
        })
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local, self.remote)
    }
}

/// Where the remote port gets resolved.
#[derive(Debug, Clone, Copy)]
pub enum PortSource<'a> {
    /// The tunnel was requested through a service; `pod` is the instance it selected.
    Service {
        service: &'a Service,
        pod: &'a Workload,
    },
    /// The tunnel targets a pod directly.
    Workload(&'a Workload),
}

/// Resolves `mapping` so that its remote side is the container port number.
///
/// When the port spec wrote the same name on both sides, the local side follows
/// the resolved remote number. An explicit local value is never touched.
pub fn resolve(mapping: &PortMapping, source: PortSource<'_>) -> Result<PortMapping> {
    let container_port = match source {
        PortSource::Service { service, pod } => {
            let service_port = match as_number(&mapping.remote)? {
                Some(n) => n,
                None => lookup_service_port_by_name(service, &mapping.remote)?,
            };
            lookup_container_port_by_service_port(service, pod, service_port)?
        }
        PortSource::Workload(pod) => match as_number(&mapping.remote)? {
            Some(n) => n,
            None => lookup_container_port_by_name(pod, &mapping.remote)?,
        },
    };

    let remote = container_port.to_string();
    let symmetric = mapping.local == mapping.remote && as_number(&mapping.remote)?.is_none();
    let local = if symmetric {
        remote.clone()
    } else {
        mapping.local.clone()
    };

    Ok(PortMapping { local, remote })
}

fn lookup_service_port_by_name(service: &Service, name: &str) -> Result<u16> {
    let mut matches = service
        .ports
        .iter()
        .filter(|p| p.name.as_deref() == Some(name))
        .map(|p| p.port);

    match (matches.next(), matches.next()) {
        (Some(port), None) => Ok(port),
        (Some(_), Some(_)) => Err(Error::Resolution(format!(
            "service '{}' declares more than one port named '{}'",
            service.name, name
        ))),
        (None, _) => Err(Error::Resolution(format!(
            "service '{}' does not have a service port named '{}'",
            service.name, name
        ))),
    }
}

fn lookup_container_port_by_service_port(
    service: &Service,
    pod: &Workload,
    service_port: u16,
) -> Result<u16> {
    let decl = service
        .ports
        .iter()
        .find(|p| p.port == service_port)
        .ok_or_else(|| {
            Error::Resolution(format!(
                "service '{}' does not have a service port {}",
                service.name, service_port
            ))
        })?;

    match &decl.target_port {
        None | Some(TargetPort::Number(0)) => Ok(service_port),
        Some(TargetPort::Number(n)) => Ok(*n),
        Some(TargetPort::Name(name)) => lookup_container_port_by_name(pod, name),
    }
}

fn lookup_container_port_by_name(pod: &Workload, name: &str) -> Result<u16> {
    let mut numbers: Vec<u16> = pod
        .ports
        .iter()
        .filter(|p| p.name.as_deref() == Some(name))
        .map(|p| p.container_port)
        .collect();
    numbers.sort_unstable();
    numbers.dedup();

    match numbers.as_slice() {
        [port] => Ok(*port),
        [] => Err(Error::Resolution(format!(
            "pod '{}' does not have a named port '{}'",
            pod.name, name
        ))),
        _ => Err(Error::Resolution(format!(
            "pod '{}' declares port name '{}' for several ports ({:?})",
            pod.name, name, numbers
        ))),
    }
}

/// `Some(n)` for a numeric port, `None` for a name, an error for a number
/// that does not fit a port.
fn as_number(s: &str) -> Result<Option<u16>> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }
    s.parse::<u16>()
        .map(Some)
        .map_err(|_| Error::Resolution(format!("port '{}' is out of range", s)))
}
