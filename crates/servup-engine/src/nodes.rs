//! Reinstallation of remote SSH nodes so they run the same server version as
//! the local installation.

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::error::UpgradeError;
use crate::layout::InstallLayout;

pub const INSTALL_FAILURE_MARKER: &str = "Command install-node-ssh failed";
const DEFAULT_SSH_PORT: &str = "22";
const PRODUCT_ROOT_TOKEN: &str = "${com.sun.aas.productRoot}";
const POLL_INTERVAL: Duration = Duration::from_millis(100);

static NODES_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<nodes\b[^>]*?(?:/>|>(.*?)</nodes\s*>)").expect("valid nodes pattern")
});
static NODE_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<node\b([^>]*?)(?:/>|>(.*?)</node\s*>)").expect("valid node pattern")
});
static SSH_CONNECTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<ssh-connector\b([^>]*?)(?:/>|>(.*?)</ssh-connector\s*>)")
        .expect("valid ssh-connector pattern")
});
static SSH_AUTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<ssh-auth\b([^>]*?)/?>").expect("valid ssh-auth pattern"));
static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid comment pattern"));
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][\w.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid attribute pattern")
});

/// Connection and install details of one SSH node.
#[derive(Clone, PartialEq, Eq)]
pub struct SshNode {
    pub name: String,
    pub host: String,
    pub install_dir: String,
    pub port: String,
    pub user: Option<String>,
    pub key_file: Option<String>,
    pub password: Option<String>,
    pub key_passphrase: Option<String>,
}

impl std::fmt::Debug for SshNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshNode")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("install_dir", &self.install_dir)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("key_file", &self.key_file)
            .finish_non_exhaustive()
    }
}

impl SshNode {
    /// `KEY=value` lines fed to the installer's password file on stdin.
    pub fn secret_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(password) = &self.password {
            lines.push(format!("AS_ADMIN_SSHPASSWORD={password}"));
        }
        if let Some(passphrase) = &self.key_passphrase {
            lines.push(format!("AS_ADMIN_SSHKEYPASSPHRASE={passphrase}"));
        }
        lines
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeType {
    Ssh(SshNode),
    /// The node every domain creates for itself; nothing to reinstall.
    DefaultLocal,
    Other { node_type: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub name: String,
    pub kind: NodeType,
}

/// Extracts the `<node>` definitions of one domain's `domain.xml`.
pub fn parse_domain_nodes(xml: &str, domain: &str, product_root: &str) -> Result<Vec<NodeConfig>> {
    // Commented-out nodes are not part of the configuration.
    let stripped = COMMENT.replace_all(xml, "");
    let xml: &str = &stripped;
    if !xml.contains("<domain") {
        return Err(anyhow!("not a domain configuration: missing <domain> element"));
    }
    if xml.matches("<node ").count() + xml.matches("<node>").count()
        > NODE_ELEMENT.find_iter(xml).count()
    {
        return Err(anyhow!("malformed <node> element"));
    }

    let Some(block) = NODES_BLOCK.captures(xml) else {
        return Ok(Vec::new());
    };
    let Some(body) = block.get(1) else {
        return Ok(Vec::new());
    };

    let mut nodes = Vec::new();
    for element in NODE_ELEMENT.captures_iter(body.as_str()) {
        let attrs = attributes(element.get(1).map_or("", |m| m.as_str()));
        let name = required(&attrs, "name", "node")?;
        let node_type = required(&attrs, "type", "node")?;

        let kind = if node_type == "SSH" {
            let inner = element.get(2).map_or("", |m| m.as_str());
            NodeType::Ssh(parse_ssh_node(&name, &attrs, inner, product_root)?)
        } else if node_type == "CONFIG" && name == format!("localhost-{domain}") {
            NodeType::DefaultLocal
        } else {
            NodeType::Other { node_type }
        };
        nodes.push(NodeConfig { name, kind });
    }
    Ok(nodes)
}

fn parse_ssh_node(
    name: &str,
    attrs: &[(String, String)],
    inner: &str,
    product_root: &str,
) -> Result<SshNode> {
    let host = required(attrs, "node-host", "SSH node")
        .with_context(|| format!("SSH node {name} has no host"))?;
    let install_dir = match lookup(attrs, "install-dir") {
        Some(dir) if dir != PRODUCT_ROOT_TOKEN => dir.to_string(),
        _ => product_root.to_string(),
    };

    let connector = SSH_CONNECTOR.captures(inner);
    let connector_attrs = connector
        .as_ref()
        .and_then(|c| c.get(1))
        .map(|m| attributes(m.as_str()))
        .unwrap_or_default();
    let auth_attrs = connector
        .as_ref()
        .and_then(|c| c.get(2))
        .and_then(|body| SSH_AUTH.captures(body.as_str()))
        .and_then(|auth| auth.get(1))
        .map(|m| attributes(m.as_str()))
        .unwrap_or_default();

    let optional = |key: &str| lookup(&auth_attrs, key).map(str::to_string);
    Ok(SshNode {
        name: name.to_string(),
        host,
        install_dir,
        port: lookup(&connector_attrs, "ssh-port")
            .unwrap_or(DEFAULT_SSH_PORT)
            .to_string(),
        user: optional("user-name"),
        key_file: optional("keyfile").or_else(|| optional("key-file")),
        password: optional("password"),
        key_passphrase: optional("key-passphrase"),
    })
}

fn attributes(raw: &str) -> Vec<(String, String)> {
    ATTRIBUTE
        .captures_iter(raw)
        .map(|c| {
            let value = c.get(2).or_else(|| c.get(3)).map_or("", |m| m.as_str());
            (c[1].to_string(), unescape(value))
        })
        .collect()
}

fn lookup<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.as_str())
        .filter(|value| !value.is_empty())
}

fn required(attrs: &[(String, String)], key: &str, element: &str) -> Result<String> {
    lookup(attrs, key)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("{element} element is missing its {key} attribute"))
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Installs the local server version onto a remote node.
pub trait NodeInstaller {
    fn install_ssh_node(&mut self, node: &SshNode) -> Result<()>;
}

/// Runs `nadmin install-node-ssh`, passing secrets on stdin.
#[derive(Debug, Clone)]
pub struct NadminNodeInstaller {
    script: PathBuf,
    timeout: Duration,
}

impl NadminNodeInstaller {
    pub fn new(script: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            script: script.into(),
            timeout,
        }
    }

    pub(crate) fn build_command(&self, node: &SshNode) -> Command {
        let mut command = Command::new(&self.script);
        command.arg("--interactive=false");
        if !node.secret_lines().is_empty() {
            command.arg("--passwordfile").arg("-");
        }
        command
            .arg("install-node-ssh")
            .arg("--installdir")
            .arg(&node.install_dir)
            .arg("--force")
            .arg("--sshport")
            .arg(&node.port);
        if let Some(user) = &node.user {
            command.arg("--sshuser").arg(user);
        }
        if let Some(key_file) = &node.key_file {
            command.arg("--sshkeyfile").arg(key_file);
        }
        command.arg(&node.host);
        command
    }
}

impl NodeInstaller for NadminNodeInstaller {
    fn install_ssh_node(&mut self, node: &SshNode) -> Result<()> {
        let mut command = self.build_command(node);
        debug!(command = ?command, "executing node install");
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start {}", self.script.display()))?;

        let reader = child.stdout.take().map(|mut stdout| {
            thread::spawn(move || {
                let mut captured = String::new();
                let _ = stdout.read_to_string(&mut captured);
                captured
            })
        });

        // An installer that exits early closes the pipe; its output still decides.
        let delivered = match child.stdin.take() {
            Some(mut stdin) => node
                .secret_lines()
                .iter()
                .try_for_each(|line| writeln!(stdin, "{line}")),
            None => Ok(()),
        };

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().context("failed to poll node installer")? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(anyhow!(
                    "install-node-ssh did not exit within {} seconds, it may have timed out",
                    self.timeout.as_secs()
                ));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stdout = reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        debug!(node = %node.name, output = %stdout.trim(), "node installer output");
        if stdout.contains(INSTALL_FAILURE_MARKER) {
            return Err(anyhow!("{INSTALL_FAILURE_MARKER}"));
        }
        if !status.success() {
            return Err(anyhow!("install-node-ssh exited with {status}"));
        }
        delivered.context("failed to pass credentials to node installer")?;
        Ok(())
    }
}

/// Reinstalls every SSH node of every domain. All domain configurations are
/// read before any node is touched; every node is attempted even after one
/// fails. Returns the number of nodes reinstalled.
pub fn reinstall_nodes(
    layout: &InstallLayout,
    installer: &mut dyn NodeInstaller,
) -> Result<usize, UpgradeError> {
    let domains = layout.list_domains().map_err(|source| UpgradeError::Manifest {
        path: layout.domains_dir(),
        source,
    })?;
    let product_root = layout.parent_dir().display().to_string();

    let mut plans = Vec::new();
    for domain in domains {
        let path = layout.domain_xml_path(&domain);
        let nodes = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))
            .and_then(|xml| parse_domain_nodes(&xml, &domain, &product_root))
            .map_err(|err| UpgradeError::RemoteNodeSetup {
                domain: domain.clone(),
                detail: format!("{err:#}"),
            })?;
        plans.push((domain, nodes));
    }

    let mut reinstalled = 0;
    let mut failing = Vec::new();
    for (domain, nodes) in &plans {
        info!("Reinstalling nodes for domain {domain}");
        let mut found = false;
        for node in nodes {
            match &node.kind {
                NodeType::Ssh(ssh) => {
                    found = true;
                    info!("Reinstalling SSH node {}", node.name);
                    match installer.install_ssh_node(ssh) {
                        Ok(()) => reinstalled += 1,
                        Err(err) => {
                            error!(node = %node.name, error = %format!("{err:#}"), "node reinstall failed");
                            failing.push(node.name.clone());
                        }
                    }
                }
                NodeType::Other { node_type } => {
                    found = true;
                    warn!(
                        "Only the SSH nodes are upgraded by this tool, please upgrade your node with name {} of type {} manually",
                        node.name, node_type
                    );
                }
                NodeType::DefaultLocal => {}
            }
        }
        if !found {
            debug!(domain = %domain, "no nodes found for domain");
        }
    }

    if failing.is_empty() {
        Ok(reinstalled)
    } else {
        Err(UpgradeError::RemoteNodes { failing })
    }
}
