use std::path::{Path, PathBuf};

use anyhow::Context;

pub const BASE_DIR_ENV: &str = "TGOUTBOX_BASE_DIR";
const DB_FILE: &str = "tgoutbox.sqlite";

#[derive(Clone, Debug)]
pub struct Paths {
  pub base_dir: PathBuf,
  pub data_dir: PathBuf,
  pub logs_dir: PathBuf
}

impl Paths {
  // Явный каталог, затем TGOUTBOX_BASE_DIR, затем каталог бинарника.
  pub fn resolve(explicit: Option<PathBuf>) -> anyhow::Result<Self> {
    let from_env = || std::env::var_os(BASE_DIR_ENV).filter(|v| !v.is_empty()).map(PathBuf::from);
    let base_dir = match explicit.or_else(from_env) {
      Some(dir) => dir,
      None => {
        let exe = std::env::current_exe().context("Не удалось определить путь к бинарнику")?;
        exe
          .parent()
          .map(Path::to_path_buf)
          .context("У бинарника нет родительского каталога")?
      }
    };
    Ok(Self::from_base(base_dir))
  }

  pub fn from_base(base_dir: PathBuf) -> Self {
    Self {
      data_dir: base_dir.join("data"),
      logs_dir: base_dir.join("logs"),
      base_dir
    }
  }

  pub fn ensure_dirs(&self) -> anyhow::Result<()> {
    for dir in [&self.data_dir, &self.logs_dir] {
      std::fs::create_dir_all(dir).with_context(|| format!("Не удалось создать каталог {}", dir.display()))?;
    }
    Ok(())
  }

  pub fn sqlite_path(&self) -> PathBuf {
    self.data_dir.join(DB_FILE)
  }
}
