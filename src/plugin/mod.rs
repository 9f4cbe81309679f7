//! Execution of generated configs against the underlying CNI plugins.
//!
//! Configs are attached in order. When one fails, every config attached
//! before it is detached again, newest first, before the error is returned.

use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{error, info, warn};

use crate::error::PluginError;
use crate::types::{CmdArgs, Result as CniResult};

/// Runs one generated config
pub trait PluginInvoker {
    fn add(&self, conf: &[u8], args: &CmdArgs) -> Result<CniResult, PluginError>;
    fn del(&self, conf: &[u8], args: &CmdArgs) -> Result<(), PluginError>;
}

/// Arguments for the config at `index`; the pod interface is `<ifname>-<index>`
pub fn interface_args(args: &CmdArgs, index: usize) -> CmdArgs {
    CmdArgs {
        ifname: format!("{}-{}", args.ifname, index),
        ..args.clone()
    }
}

/// Attach every config, rolling back the attached ones on failure
pub fn attach_all<I: PluginInvoker + ?Sized>(
    invoker: &I,
    documents: &[Vec<u8>],
    args: &CmdArgs,
) -> Result<Vec<CniResult>, PluginError> {
    let mut results = Vec::with_capacity(documents.len());
    for (index, document) in documents.iter().enumerate() {
        match invoker.add(document, &interface_args(args, index)) {
            Ok(result) => results.push(result),
            Err(e) => {
                error!("attach of config {} failed: {}", index, e);
                for undo in (0..index).rev() {
                    if let Err(del_err) = invoker.del(&documents[undo], &interface_args(args, undo)) {
                        warn!("rollback of config {} failed: {}", undo, del_err);
                    }
                }
                return Err(e);
            }
        }
    }
    info!("attached {} interfaces to {}", results.len(), args.container_id);
    Ok(results)
}

/// Detach every config, newest first, and report the ones that failed
pub fn detach_all<I: PluginInvoker + ?Sized>(
    invoker: &I,
    documents: &[Vec<u8>],
    args: &CmdArgs,
) -> Vec<(usize, PluginError)> {
    let mut failures = Vec::new();
    for (index, document) in documents.iter().enumerate().rev() {
        if let Err(e) = invoker.del(document, &interface_args(args, index)) {
            warn!("detach of config {} failed: {}", index, e);
            failures.push((index, e));
        }
    }
    failures
}

/// Combine per-interface results into one
pub fn merge_results(cni_version: &str, results: Vec<CniResult>) -> CniResult {
    let mut merged = CniResult::new(cni_version);
    for result in results {
        merged.merge(result);
    }
    merged
}

/// Invoker that executes plugin binaries found in the CNI path
pub struct ExecInvoker {
    cni_path: String,
}

impl ExecInvoker {
    pub fn new(cni_path: &str) -> Self {
        Self {
            cni_path: cni_path.to_string(),
        }
    }

    fn find_plugin(&self, plugin_type: &str) -> Result<PathBuf, PluginError> {
        self.cni_path
            .split(':')
            .filter(|dir| !dir.is_empty())
            .map(|dir| Path::new(dir).join(plugin_type))
            .find(|path| path.is_file())
            .ok_or_else(|| PluginError::NotFound(plugin_type.to_string()))
    }

    fn exec(&self, command: &str, conf: &Value, args: &CmdArgs) -> Result<Vec<u8>, PluginError> {
        let plugin_type = conf.get("type").and_then(Value::as_str).unwrap_or_default();
        let plugin_path = self.find_plugin(plugin_type)?;
        let stdin_data = serde_json::to_vec(conf)?;

        let mut child = Command::new(&plugin_path)
            .env("CNI_COMMAND", command)
            .env("CNI_CONTAINERID", &args.container_id)
            .env("CNI_NETNS", &args.netns)
            .env("CNI_IFNAME", &args.ifname)
            .env("CNI_PATH", &self.cni_path)
            .env("CNI_ARGS", args.args_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&stdin_data) {
                drop(stdin);
                // Reap the child before reporting the failed write
                if let Err(kill_err) = child.kill() {
                    warn!("failed to kill plugin {}: {}", plugin_type, kill_err);
                }
                if let Err(wait_err) = child.wait() {
                    warn!("failed to reap plugin {}: {}", plugin_type, wait_err);
                }
                return Err(e.into());
            }
        }
        let output = child.wait_with_output()?;

        if !output.status.success() {
            // Plugins report errors as {"code": .., "msg": ..} on stdout
            let message = serde_json::from_slice::<Value>(&output.stdout)
                .ok()
                .and_then(|value| value.get("msg")?.as_str().map(str::to_string))
                .unwrap_or_else(|| String::from_utf8_lossy(&output.stderr).trim().to_string());
            return Err(PluginError::Failed {
                plugin: plugin_type.to_string(),
                message,
            });
        }

        Ok(output.stdout)
    }
}

/// Chain element with the list-level fields and the previous result injected
fn chain_element(header: &Map<String, Value>, plugin: &Value, prev_result: Option<&Value>) -> Value {
    let mut element = plugin.as_object().cloned().unwrap_or_default();
    for key in ["name", "cniVersion"] {
        if let Some(value) = header.get(key) {
            element.insert(key.to_string(), value.clone());
        }
    }
    if let Some(prev) = prev_result {
        element.insert("prevResult".to_string(), prev.clone());
    }
    Value::Object(element)
}

impl PluginInvoker for ExecInvoker {
    fn add(&self, conf: &[u8], args: &CmdArgs) -> Result<CniResult, PluginError> {
        let conf: Value = serde_json::from_slice(conf)?;

        let Some(plugins) = conf.get("plugins").and_then(Value::as_array) else {
            let stdout = self.exec("ADD", &conf, args)?;
            return Ok(serde_json::from_slice(&stdout)?);
        };

        let header = conf.as_object().cloned().unwrap_or_default();
        let mut prev_result: Option<Value> = None;
        for plugin in plugins {
            let element = chain_element(&header, plugin, prev_result.as_ref());
            let stdout = self.exec("ADD", &element, args)?;
            prev_result = Some(serde_json::from_slice(&stdout)?);
        }

        match prev_result {
            Some(result) => Ok(serde_json::from_value(result)?),
            None => Err(PluginError::Failed {
                plugin: "chain".to_string(),
                message: "empty plugin chain".to_string(),
            }),
        }
    }

    fn del(&self, conf: &[u8], args: &CmdArgs) -> Result<(), PluginError> {
        let conf: Value = serde_json::from_slice(conf)?;

        let Some(plugins) = conf.get("plugins").and_then(Value::as_array) else {
            self.exec("DEL", &conf, args)?;
            return Ok(());
        };

        let header = conf.as_object().cloned().unwrap_or_default();
        let mut first_error = None;
        for plugin in plugins.iter().rev() {
            let element = chain_element(&header, plugin, None);
            if let Err(e) = self.exec("DEL", &element, args) {
                warn!("DEL of chained plugin failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
