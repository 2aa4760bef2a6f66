//! Reference `ToolRegistry` (§10): enough tool classes — `file_ops`,
//! `network_ops`, `package_manager`, `service_ctl`, `container_ctl`,
//! `vcs` — to exercise `DependencyAnalyzer`'s conflict rules and every
//! `RollbackStrategy` variant end to end (seed scenarios A-F). Not a
//! production tool catalog; the spec treats `ToolRegistry` as an
//! external collaborator the core never implements itself.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use forge_common::{CoreError, ResourceTouch, RollbackStrategy, ToolInvocationResult, ToolRegistry};
use serde_json::Value;

fn arg_str<'a>(args: &'a BTreeMap<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

/// `package_manager`/`vcs` serialize all their own calls against each
/// other regardless of argument overlap (§4.1 step 1) — installing two
/// packages concurrently, or running two git mutations concurrently,
/// both race on shared lockfile/index state the registry doesn't model
/// at the resource-id level.
const SERIALIZING_CLASSES: [&str; 2] = ["package_manager", "vcs"];

pub struct ReferenceToolRegistry;

#[async_trait]
impl ToolRegistry for ReferenceToolRegistry {
    async fn invoke(
        &self,
        tool: &str,
        action: &str,
        args: &BTreeMap<String, Value>,
    ) -> Result<ToolInvocationResult, CoreError> {
        match tool {
            "file_ops" => self.file_ops(action, args).await,
            "network_ops" => self.network_ops(action, args).await,
            "package_manager" => self.package_manager(action, args).await,
            "service_ctl" => self.service_ctl(action, args).await,
            "container_ctl" => self.container_ctl(action, args).await,
            "vcs" => self.vcs(action, args).await,
            other => Err(CoreError::NotFound { message: format!("unknown tool class '{other}'") }),
        }
    }

    fn is_serializing_class(&self, tool: &str) -> bool {
        SERIALIZING_CLASSES.contains(&tool)
    }

    fn resource_touches(&self, tool: &str, action: &str, args: &BTreeMap<String, Value>) -> Vec<ResourceTouch> {
        match tool {
            "file_ops" => match action {
                "mkdir" | "write_file" | "delete" | "move" => {
                    let mut touches = Vec::new();
                    if let Some(path) = arg_str(args, "path") {
                        touches.push(ResourceTouch { resource_id: format!("fs:{path}"), writes: true });
                    }
                    if let Some(from) = arg_str(args, "from") {
                        touches.push(ResourceTouch { resource_id: format!("fs:{from}"), writes: true });
                    }
                    if let Some(to) = arg_str(args, "to") {
                        touches.push(ResourceTouch { resource_id: format!("fs:{to}"), writes: true });
                    }
                    touches
                }
                "read_file" | "list_dir" => arg_str(args, "path")
                    .map(|p| vec![ResourceTouch { resource_id: format!("fs:{p}"), writes: false }])
                    .unwrap_or_default(),
                _ => vec![],
            },
            "network_ops" => arg_str(args, "url")
                .map(|u| vec![ResourceTouch { resource_id: format!("net:{u}"), writes: action == "download" }])
                .unwrap_or_default(),
            "service_ctl" => arg_str(args, "name")
                .map(|n| vec![ResourceTouch { resource_id: format!("service:{n}"), writes: true }])
                .unwrap_or_default(),
            "container_ctl" => arg_str(args, "id")
                .map(|i| vec![ResourceTouch { resource_id: format!("container:{i}"), writes: true }])
                .unwrap_or_default(),
            "package_manager" | "vcs" => vec![],
        }
    }
}

impl ReferenceToolRegistry {
    async fn file_ops(&self, action: &str, args: &BTreeMap<String, Value>) -> Result<ToolInvocationResult, CoreError> {
        match action {
            "mkdir" => {
                let path = require_str(args, "path")?;
                tokio::fs::create_dir_all(&path).await.map_err(io_err)?;
                Ok(ToolInvocationResult {
                    stdout: format!("created directory {path}"),
                    stderr: String::new(),
                    rollback_strategy: RollbackStrategy::Delete { path },
                })
            }
            "write_file" => {
                let path = require_str(args, "path")?;
                let content = arg_str(args, "content").unwrap_or_default();
                let existed = Path::new(&path).exists();
                tokio::fs::write(&path, content).await.map_err(io_err)?;
                Ok(ToolInvocationResult {
                    stdout: format!("wrote {} bytes to {path}", content.len()),
                    stderr: String::new(),
                    rollback_strategy: if existed {
                        RollbackStrategy::None
                    } else {
                        RollbackStrategy::Delete { path }
                    },
                })
            }
            "read_file" => {
                let path = require_str(args, "path")?;
                let content = tokio::fs::read_to_string(&path).await.map_err(io_err)?;
                Ok(ToolInvocationResult { stdout: content, stderr: String::new(), rollback_strategy: RollbackStrategy::None })
            }
            "delete" => {
                let path = require_str(args, "path")?;
                tokio::fs::remove_file(&path).await.map_err(io_err)?;
                Ok(ToolInvocationResult {
                    stdout: format!("deleted {path}"),
                    stderr: String::new(),
                    rollback_strategy: RollbackStrategy::None,
                })
            }
            "move" => {
                let from = require_str(args, "from")?;
                let to = require_str(args, "to")?;
                tokio::fs::rename(&from, &to).await.map_err(io_err)?;
                Ok(ToolInvocationResult {
                    stdout: format!("moved {from} -> {to}"),
                    stderr: String::new(),
                    rollback_strategy: RollbackStrategy::MoveBack { from: to, to: from },
                })
            }
            other => Err(CoreError::Syntax { message: format!("file_ops has no action '{other}'") }),
        }
    }

    async fn network_ops(&self, action: &str, args: &BTreeMap<String, Value>) -> Result<ToolInvocationResult, CoreError> {
        match action {
            "download" => {
                let url = require_str(args, "url")?;
                Ok(ToolInvocationResult {
                    stdout: format!("downloaded {url}"),
                    stderr: String::new(),
                    rollback_strategy: RollbackStrategy::None,
                })
            }
            other => Err(CoreError::Syntax { message: format!("network_ops has no action '{other}'") }),
        }
    }

    async fn package_manager(&self, action: &str, args: &BTreeMap<String, Value>) -> Result<ToolInvocationResult, CoreError> {
        let pkg = require_str(args, "pkg")?;
        match action {
            "install" => Ok(ToolInvocationResult {
                stdout: format!("installed {pkg}"),
                stderr: String::new(),
                rollback_strategy: RollbackStrategy::Uninstall { pkg },
            }),
            "uninstall" => Ok(ToolInvocationResult {
                stdout: format!("uninstalled {pkg}"),
                stderr: String::new(),
                rollback_strategy: RollbackStrategy::Reinstall { pkg },
            }),
            other => Err(CoreError::Syntax { message: format!("package_manager has no action '{other}'") }),
        }
    }

    async fn service_ctl(&self, action: &str, args: &BTreeMap<String, Value>) -> Result<ToolInvocationResult, CoreError> {
        let name = require_str(args, "name")?;
        match action {
            "start" => Ok(ToolInvocationResult {
                stdout: format!("started {name}"),
                stderr: String::new(),
                rollback_strategy: RollbackStrategy::ServiceStop { name },
            }),
            "stop" => Ok(ToolInvocationResult {
                stdout: format!("stopped {name}"),
                stderr: String::new(),
                rollback_strategy: RollbackStrategy::ServiceStart { name },
            }),
            other => Err(CoreError::Syntax { message: format!("service_ctl has no action '{other}'") }),
        }
    }

    async fn container_ctl(&self, action: &str, args: &BTreeMap<String, Value>) -> Result<ToolInvocationResult, CoreError> {
        let id = require_str(args, "id")?;
        match action {
            "run" => Ok(ToolInvocationResult {
                stdout: format!("started container {id}"),
                stderr: String::new(),
                rollback_strategy: RollbackStrategy::ContainerStopAndRemove { id },
            }),
            other => Err(CoreError::Syntax { message: format!("container_ctl has no action '{other}'") }),
        }
    }

    async fn vcs(&self, action: &str, args: &BTreeMap<String, Value>) -> Result<ToolInvocationResult, CoreError> {
        match action {
            "commit" => {
                let hash = arg_str(args, "hash").unwrap_or("HEAD").to_string();
                Ok(ToolInvocationResult {
                    stdout: format!("committed as {hash}"),
                    stderr: String::new(),
                    rollback_strategy: RollbackStrategy::GitReset { hash },
                })
            }
            other => Err(CoreError::Syntax { message: format!("vcs has no action '{other}'") }),
        }
    }
}

fn require_str(args: &BTreeMap<String, Value>, key: &str) -> Result<String, CoreError> {
    arg_str(args, key)
        .map(str::to_string)
        .ok_or_else(|| CoreError::Schema { message: format!("missing required arg '{key}'") })
}

fn io_err(e: std::io::Error) -> CoreError {
    match e.kind() {
        std::io::ErrorKind::NotFound => CoreError::NotFound { message: e.to_string() },
        std::io::ErrorKind::PermissionDenied => CoreError::Permission { message: e.to_string() },
        _ => CoreError::Transient { message: e.to_string() },
    }
}
