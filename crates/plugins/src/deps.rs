//! Plugin dependency install jobs (best-effort, opt-in).
//!
//! Each plugin gets a durable job record under `plugins.deps.<name>` in the
//! state store. A prior successful run with the same manifest/requirements
//! digest short-circuits; per-plugin runs are serialized through the task
//! map. Command output is captured and truncated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use tokio::sync::Mutex;

use cerise_state::StateStore;

use cerise_domain::error::{Error, Result};

use crate::safety::validate_plugin_name;

const LOG_CAP: usize = 20_000;

/// Runs and tracks plugin dependency installs.
pub struct PluginDepsJobs {
    store: StateStore,
    plugins_dir: PathBuf,
    venv_dir_name: String,
    tasks: Arc<Mutex<HashMap<String, tokio::task::JoinHandle<()>>>>,
}

impl PluginDepsJobs {
    pub fn new(store: StateStore, plugins_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            plugins_dir: plugins_dir.into(),
            venv_dir_name: ".venv".into(),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_venv_dir(mut self, venv_dir_name: &str) -> Self {
        self.venv_dir_name = venv_dir_name.to_string();
        self
    }

    fn key(plugin_name: &str) -> String {
        format!("plugins.deps.{}", plugin_name.replace('/', "_"))
    }

    /// Current job record for a plugin, if any.
    pub async fn get(&self, plugin_name: &str) -> Option<Value> {
        let plugin_name = validate_plugin_name(plugin_name).ok()?;
        self.store.get(&Self::key(&plugin_name)).await
    }

    /// Start (or short-circuit) the install job for a plugin. Returns the
    /// job record as stored.
    pub async fn start(&self, plugin_name: &str, force: bool) -> Result<Value> {
        let plugin_name = validate_plugin_name(plugin_name)?;
        let plugin_dir = self.plugins_dir.join(&plugin_name);
        let manifest_path = plugin_dir.join("manifest.json");
        if !manifest_path.exists() {
            return Err(Error::NotFound(format!(
                "plugin manifest not found: {}",
                manifest_path.display()
            )));
        }

        let manifest_bytes = std::fs::read(&manifest_path).map_err(Error::Io)?;
        let req_path = plugin_dir.join("requirements.txt");
        let req_bytes = std::fs::read(&req_path).unwrap_or_default();
        let digest = {
            let mut hasher = Sha1::new();
            hasher.update(&manifest_bytes);
            hasher.update(&req_bytes);
            hex::encode(hasher.finalize())
        };

        let key = Self::key(&plugin_name);
        if !force {
            if let Some(existing) = self.store.get(&key).await {
                let status = existing.get("status").and_then(Value::as_str).unwrap_or("");
                if status == "pending" || status == "running" {
                    return Ok(existing);
                }
                if status == "success"
                    && existing.get("digest").and_then(Value::as_str) == Some(digest.as_str())
                {
                    return Ok(existing);
                }
            }
        }

        let job = json!({
            "plugin": plugin_name,
            "digest": digest,
            "status": "pending",
            "started_at": chrono::Utc::now().to_rfc3339(),
            "finished_at": null,
            "log": "",
            "error": null,
        });
        self.store.set(&key, job.clone()).await?;

        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.get(&plugin_name) {
            if !task.is_finished() {
                return Ok(job);
            }
        }

        let runner = JobRunner {
            store: self.store.clone(),
            key: key.clone(),
            plugin_dir,
            venv_dir_name: self.venv_dir_name.clone(),
        };
        let name_for_log = plugin_name.clone();
        tasks.insert(
            plugin_name,
            tokio::spawn(async move {
                if let Err(e) = runner.run().await {
                    tracing::error!(plugin = %name_for_log, error = %e, "dependency install job failed");
                }
            }),
        );
        Ok(job)
    }

    /// Wait for a plugin's running job to finish (used by tests and
    /// synchronous install flows).
    pub async fn wait(&self, plugin_name: &str) {
        let task = self.tasks.lock().await.remove(plugin_name);
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

struct JobRunner {
    store: StateStore,
    key: String,
    plugin_dir: PathBuf,
    venv_dir_name: String,
}

impl JobRunner {
    async fn run(&self) -> Result<()> {
        let manifest: Value = serde_json::from_slice(
            &std::fs::read(self.plugin_dir.join("manifest.json")).map_err(Error::Io)?,
        )
        .unwrap_or(Value::Null);
        let language = manifest
            .get("runtime")
            .and_then(|r| r.get("language"))
            .or_else(|| manifest.get("language"))
            .and_then(Value::as_str)
            .unwrap_or("python")
            .to_lowercase();

        self.update(|job| job["status"] = json!("running")).await?;

        let outcome = match language.as_str() {
            "python" => self.install_python(&manifest).await,
            "node" | "nodejs" | "javascript" => self.install_node().await,
            "go" | "golang" => self.install_go().await,
            other => {
                self.append_log("skip", &format!("Dependency install not supported for language '{other}'."))
                    .await?;
                Ok(())
            }
        };

        match outcome {
            Ok(()) => {
                self.update(|job| {
                    job["status"] = json!("success");
                    job["finished_at"] = json!(chrono::Utc::now().to_rfc3339());
                    job["error"] = Value::Null;
                })
                .await
            }
            Err(e) => {
                self.append_log("error", &e.to_string()).await?;
                self.update(|job| {
                    job["status"] = json!("error");
                    job["finished_at"] = json!(chrono::Utc::now().to_rfc3339());
                    job["error"] = json!(e.to_string());
                })
                .await
            }
        }
    }

    async fn install_python(&self, manifest: &Value) -> Result<()> {
        let req_file = self.plugin_dir.join("requirements.txt");
        let deps = manifest
            .get("dependencies")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        if !req_file.exists() && deps.is_empty() {
            self.append_log("python", "No requirements.txt or dependencies found; skipping.")
                .await?;
            return Ok(());
        }

        let venv_dir = self.plugin_dir.join(&self.venv_dir_name);
        let python_path = venv_dir.join(if cfg!(windows) { "Scripts/python.exe" } else { "bin/python" });

        if !python_path.exists() {
            let (code, output) = self
                .run_cmd("python3", &["-m".into(), "venv".into(), venv_dir.display().to_string()])
                .await?;
            self.append_log("venv", &output).await?;
            if code != 0 {
                return Err(Error::Other(format!("venv creation failed (code={code})")));
            }
        }
        let python = if python_path.exists() {
            python_path.display().to_string()
        } else {
            "python3".to_string()
        };

        let mut args = vec!["-m".to_string(), "pip".to_string(), "install".to_string()];
        if req_file.exists() {
            args.push("-r".into());
            args.push(req_file.display().to_string());
        } else {
            for (name, version) in &deps {
                args.push(format!("{name}{}", version.as_str().unwrap_or("")));
            }
        }
        let (code, output) = self.run_cmd(&python, &args).await?;
        self.append_log("pip", &output).await?;
        if code != 0 {
            return Err(Error::Other(format!("pip install failed (code={code})")));
        }
        Ok(())
    }

    async fn install_node(&self) -> Result<()> {
        if !self.plugin_dir.join("package.json").exists() {
            self.append_log("node", "No package.json found; skipping.").await?;
            return Ok(());
        }
        let (code, output) = self
            .run_cmd("npm", &["install".into(), "--omit=dev".into()])
            .await?;
        self.append_log("npm", &output).await?;
        if code != 0 {
            return Err(Error::Other(format!("npm install failed (code={code})")));
        }
        Ok(())
    }

    async fn install_go(&self) -> Result<()> {
        if !self.plugin_dir.join("go.mod").exists() {
            self.append_log("go", "No go.mod found; skipping.").await?;
            return Ok(());
        }
        let (code, output) = self.run_cmd("go", &["mod".into(), "download".into()]).await?;
        self.append_log("go", &output).await?;
        if code != 0 {
            return Err(Error::Other(format!("go mod download failed (code={code})")));
        }
        Ok(())
    }

    async fn run_cmd(&self, program: &str, args: &[String]) -> Result<(i32, String)> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(&self.plugin_dir)
            .output()
            .await
            .map_err(|e| Error::Other(format!("failed to run {program}: {e}")))?;
        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            text.push('\n');
            text.push_str(&stderr);
        }
        Ok((output.status.code().unwrap_or(0), text))
    }

    async fn append_log(&self, section: &str, text: &str) -> Result<()> {
        let payload = format!("\n[{section}]\n{}", text.trim());
        self.update(|job| {
            let existing = job["log"].as_str().unwrap_or("").to_string();
            job["log"] = json!(truncate(&format!("{existing}\n{payload}"), LOG_CAP));
        })
        .await
    }

    async fn update(&self, mutate: impl FnOnce(&mut Value)) -> Result<()> {
        let mut job = self.store.get(&self.key).await.unwrap_or_else(|| json!({}));
        mutate(&mut job);
        self.store.set(&self.key, job).await
    }
}

fn truncate(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let mut end = cap;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n...[truncated]", &text[..end])
}
