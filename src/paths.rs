use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_dir: PathBuf,
}

impl AppPaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.base_dir.join("config")
    }

    pub fn resolver_config_path(&self) -> PathBuf {
        self.config_dir().join("resolver.json")
    }

    pub fn cookie_file_path(&self) -> PathBuf {
        self.config_dir().join("cookies.json")
    }

    pub fn db_dir(&self) -> PathBuf {
        self.base_dir.join("db")
    }

    pub fn catalog_db_path(&self) -> PathBuf {
        self.db_dir().join("catalog.sqlite")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.config_dir())?;
        std::fs::create_dir_all(self.db_dir())?;
        Ok(())
    }
}
