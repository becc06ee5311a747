//! 项目配置（pyproject.toml）
//!
//! 只读写 `[tool.floralab]` 和 `[tool.flwr.federations.<name>]` 两张表，
//! 其余内容原样保留（读-改-写合并，不整体覆盖）

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use toml::{Table, Value};
use tracing::{debug, info};

use crate::config::env::constants::{DEFAULT_FEDERATION_ADDRESS, FEDERATION_NAME};
use crate::domain::tunnel::RemoteHost;
use crate::error::ConfigError;

const PYPROJECT_FILE: &str = "pyproject.toml";
const LOGIN_NODE_KEY: &str = "login-node";

/// federation 表内容
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FederationConfig {
    pub address: Option<String>,
    pub insecure: Option<bool>,
}

/// 本地声明式配置
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocalConfig {
    pub login_node: Option<String>,
    pub federation: FederationConfig,
}

impl LocalConfig {
    /// 登录节点；未配置时为致命错误
    pub fn remote_host(&self) -> Result<RemoteHost, ConfigError> {
        match self.login_node.as_deref() {
            Some(host) => RemoteHost::new(host),
            None => Err(ConfigError::MissingLoginNode),
        }
    }
}

/// `init` 的结果
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InitReport {
    pub added_floralab: bool,
    pub updated_login_node: bool,
    pub added_federation: bool,
}

impl InitReport {
    pub fn modified(&self) -> bool {
        self.added_floralab || self.updated_login_node || self.added_federation
    }
}

/// 配置存储接口
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// 读取配置
    async fn load(&self) -> Result<LocalConfig, ConfigError>;

    /// 只更新 federation 的 `address` 字段
    async fn set_federation_address(&self, address: &str) -> Result<(), ConfigError>;

    /// 项目目录（workload 的工作目录）
    fn project_dir(&self) -> &Path;

    /// federation 名称
    fn federation(&self) -> &str;
}

/// 基于 pyproject.toml 的配置存储
#[derive(Clone, Debug)]
pub struct PyprojectStore {
    project_dir: PathBuf,
    path: PathBuf,
    federation: String,
}

impl PyprojectStore {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        let path = project_dir.join(PYPROJECT_FILE);
        Self {
            project_dir,
            path,
            federation: FEDERATION_NAME.to_string(),
        }
    }

    pub fn with_federation(mut self, federation: impl Into<String>) -> Self {
        self.federation = federation.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 添加缺失的配置表，必要时更新 login-node
    pub async fn init(&self, login_node: &RemoteHost) -> Result<InitReport, ConfigError> {
        let mut doc = self.read_document().await?;
        let mut report = InitReport::default();

        let tool = table_mut(&mut doc, &["tool"])?;
        if !tool.contains_key("floralab") {
            report.added_floralab = true;
        }
        let floralab = table_mut(tool, &["floralab"])?;
        let current = floralab.get(LOGIN_NODE_KEY).and_then(Value::as_str);
        if current != Some(login_node.as_str()) {
            if !report.added_floralab {
                report.updated_login_node = true;
            }
            floralab.insert(
                LOGIN_NODE_KEY.to_string(),
                Value::String(login_node.as_str().to_string()),
            );
        }

        let federations = table_mut(&mut doc, &["tool", "flwr", "federations"])?;
        if !federations.contains_key(&self.federation) {
            let mut federation = Table::new();
            federation.insert(
                "address".to_string(),
                Value::String(DEFAULT_FEDERATION_ADDRESS.to_string()),
            );
            federation.insert("insecure".to_string(), Value::Boolean(true));
            federations.insert(self.federation.clone(), Value::Table(federation));
            report.added_federation = true;
        }

        if report.modified() {
            self.write_document(&doc).await?;
            info!(path = %self.path.display(), ?report, "Initialized floralab configuration");
        } else {
            debug!(path = %self.path.display(), "Configuration already up to date");
        }

        Ok(report)
    }

    async fn read_document(&self) -> Result<Table, ConfigError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(self.path.clone()))
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        content.parse::<Table>().map_err(|e| ConfigError::Parse {
            path: self.path.clone(),
            source: e,
        })
    }

    async fn write_document(&self, doc: &Table) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(doc)?;
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| ConfigError::Write {
                path: self.path.clone(),
                source: e,
            })
    }
}

#[async_trait]
impl ConfigStore for PyprojectStore {
    async fn load(&self) -> Result<LocalConfig, ConfigError> {
        let doc = self.read_document().await?;

        let login_node = table(&doc, &["tool", "floralab"])
            .and_then(|t| t.get(LOGIN_NODE_KEY))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let federation = table(&doc, &["tool", "flwr", "federations", &self.federation])
            .map(|t| FederationConfig {
                address: t.get("address").and_then(Value::as_str).map(str::to_string),
                insecure: t.get("insecure").and_then(Value::as_bool),
            })
            .unwrap_or_default();

        Ok(LocalConfig {
            login_node,
            federation,
        })
    }

    async fn set_federation_address(&self, address: &str) -> Result<(), ConfigError> {
        let mut doc = self.read_document().await?;
        let federation = table_mut(
            &mut doc,
            &["tool", "flwr", "federations", self.federation.as_str()],
        )?;
        federation.insert("address".to_string(), Value::String(address.to_string()));
        self.write_document(&doc).await?;

        info!(
            path = %self.path.display(),
            federation = %self.federation,
            address = %address,
            "Updated federation address"
        );
        Ok(())
    }

    fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    fn federation(&self) -> &str {
        &self.federation
    }
}

/// 沿路径取子表（只读）
fn table<'a>(root: &'a Table, path: &[&str]) -> Option<&'a Table> {
    let mut current = root;
    for key in path {
        current = current.get(*key)?.as_table()?;
    }
    Some(current)
}

/// 沿路径取子表，缺失的表会被创建
fn table_mut<'a>(root: &'a mut Table, path: &[&str]) -> Result<&'a mut Table, ConfigError> {
    let mut current = root;
    for (i, key) in path.iter().enumerate() {
        let value = current
            .entry(key.to_string())
            .or_insert(Value::Table(Table::new()));
        current = match value {
            Value::Table(t) => t,
            _ => return Err(ConfigError::NotATable(path[..=i].join("."))),
        };
    }
    Ok(current)
}
