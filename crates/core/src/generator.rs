//! Runs the upstream patient generator and collects the CCDA document it writes.

use crate::constants::{
    DEFAULT_ADDON_MODULE, GENERATOR_ARGS, GENERATOR_CUSTOM_MODULES_DIR, GENERATOR_LOG_FILENAME,
    GENERATOR_MODULES_DIR, GENERATOR_OUTPUT_DIR, GENERATOR_POLL_INTERVAL, GENERATOR_SCRIPT,
    GENERATOR_TIMEOUT,
};
use crate::{CoreError, CoreResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Removes an installed add-on module when dropped, including on early returns.
struct InstalledModule {
    path: PathBuf,
}

impl Drop for InstalledModule {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::info!("removed add-on module {}", self.path.display()),
            Err(e) => tracing::warn!("could not remove add-on module {}: {e}", self.path.display()),
        }
    }
}

/// A generator installation and how to invoke it.
#[derive(Clone, Debug)]
pub struct Generator {
    home: PathBuf,
    program: PathBuf,
    args: Vec<String>,
    addon_module: Option<PathBuf>,
    timeout: Duration,
}

impl Generator {
    /// Generator installed at `home`, invoked as `./run_synthea -p 1 -a 20-22 Massachusetts`.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            program: home.join(GENERATOR_SCRIPT),
            home,
            args: GENERATOR_ARGS.iter().map(|a| a.to_string()).collect(),
            addon_module: None,
            timeout: GENERATOR_TIMEOUT,
        }
    }

    /// Replaces the launcher and its arguments. The working directory stays the generator home.
    pub fn with_command(mut self, program: impl Into<PathBuf>, args: &[&str]) -> Self {
        self.program = program.into();
        self.args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Module copied into the generator's module directory for the run.
    pub fn with_addon_module(mut self, module: Option<PathBuf>) -> Self {
        self.addon_module = module;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn output_dir(&self) -> PathBuf {
        self.home.join(GENERATOR_OUTPUT_DIR)
    }

    fn xml_outputs(&self) -> CoreResult<Vec<PathBuf>> {
        let pattern = self.output_dir().join("*.xml");
        let mut paths: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?
            .filter_map(Result::ok)
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn clear_outputs(&self) -> CoreResult<()> {
        let stale = self.xml_outputs()?;
        for path in &stale {
            fs::remove_file(path).map_err(|source| CoreError::FileWrite {
                path: path.clone(),
                source,
            })?;
        }
        if !stale.is_empty() {
            tracing::info!("removed {} previous CCDA output files", stale.len());
        }
        Ok(())
    }

    /// Explicit module, else the default module in the custom-modules directory if present.
    fn resolve_module(&self) -> CoreResult<Option<PathBuf>> {
        if let Some(module) = &self.addon_module {
            if !module.is_file() {
                return Err(CoreError::AddonModuleMissing(module.clone()));
            }
            return Ok(Some(module.clone()));
        }

        let default = self
            .home
            .join(GENERATOR_CUSTOM_MODULES_DIR)
            .join(DEFAULT_ADDON_MODULE);
        if default.is_file() {
            Ok(Some(default))
        } else {
            tracing::warn!(
                "no add-on module at {}, running the generator with its installed modules",
                default.display()
            );
            Ok(None)
        }
    }

    fn install_module(&self, module: &Path) -> CoreResult<InstalledModule> {
        let modules_dir = self.home.join(GENERATOR_MODULES_DIR);
        fs::create_dir_all(&modules_dir).map_err(|source| CoreError::DirCreation {
            path: modules_dir.clone(),
            source,
        })?;

        let file_name = module
            .file_name()
            .ok_or_else(|| CoreError::AddonModuleMissing(module.to_path_buf()))?;
        let target = modules_dir.join(file_name);
        fs::copy(module, &target).map_err(|source| CoreError::FileWrite {
            path: target.clone(),
            source,
        })?;
        tracing::info!("installed add-on module {}", target.display());
        Ok(InstalledModule { path: target })
    }

    /// Runs the generator once and returns the first CCDA document it produced.
    ///
    /// Output goes to a log file in the generator home. The process is killed when it exceeds the
    /// timeout. An installed add-on module is removed again however the run ends.
    ///
    /// # Errors
    ///
    /// Fails if the process cannot start, exits unsuccessfully, times out, or writes no XML file.
    pub fn generate(&self) -> CoreResult<PathBuf> {
        self.clear_outputs()?;
        let _module = match self.resolve_module()? {
            Some(module) => Some(self.install_module(&module)?),
            None => None,
        };

        let log_path = self.home.join(GENERATOR_LOG_FILENAME);
        let log = fs::File::create(&log_path).map_err(|source| CoreError::FileWrite {
            path: log_path.clone(),
            source,
        })?;
        let log_err = log.try_clone().map_err(|source| CoreError::FileWrite {
            path: log_path.clone(),
            source,
        })?;

        tracing::info!(
            "running {} {} in {}",
            self.program.display(),
            self.args.join(" "),
            self.home.display()
        );
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.home)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(CoreError::GeneratorSpawn)?;

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().map_err(CoreError::GeneratorSpawn)? {
                break status;
            }
            if start.elapsed() > self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CoreError::GeneratorTimeout(self.timeout.as_secs()));
            }
            std::thread::sleep(GENERATOR_POLL_INTERVAL);
        };

        if !status.success() {
            return Err(CoreError::GeneratorFailed {
                status: status.to_string(),
                log: log_path,
            });
        }

        let document = self
            .xml_outputs()?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::NoGeneratorOutput(self.output_dir()))?;
        tracing::info!("generator produced {}", document.display());
        Ok(document)
    }
}
