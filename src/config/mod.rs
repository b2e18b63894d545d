// Compiler-level options: everything the front end decides outside the
// Proguard configuration itself.

use std::path::PathBuf;

use crate::dex::ANDROID_L_API;
use crate::error::{CompileError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompilationMode {
    Debug,
    #[default]
    Release,
}

#[derive(Debug, Clone)]
pub struct CompilerOptions {
    pub mode: CompilationMode,
    pub min_api: u32,
    pub output: PathBuf,
    /// Emit one dex file per class (incremental builds).
    pub file_per_class: bool,
    pub tree_shaking: bool,
    pub minification: bool,
    pub inputs: Vec<PathBuf>,
    pub libraries: Vec<PathBuf>,
    pub proguard_configs: Vec<PathBuf>,
    pub proguard_map: Option<PathBuf>,
    pub main_dex_rules: Option<PathBuf>,
    pub main_dex_list: Option<PathBuf>,
    pub main_dex_list_output: Option<PathBuf>,
    pub minimal_main_dex: bool,
    pub package_distribution: Option<PathBuf>,
    pub ignore_missing_classes: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            mode: CompilationMode::Release,
            min_api: 1,
            output: PathBuf::from("."),
            file_per_class: false,
            tree_shaking: true,
            minification: true,
            inputs: Vec::new(),
            libraries: Vec::new(),
            proguard_configs: Vec::new(),
            proguard_map: None,
            main_dex_rules: None,
            main_dex_list: None,
            main_dex_list_output: None,
            minimal_main_dex: false,
            package_distribution: None,
            ignore_missing_classes: false,
        }
    }
}

impl CompilerOptions {
    pub fn can_use_multidex(&self) -> bool {
        self.min_api >= ANDROID_L_API
    }

    pub fn validate(&self) -> Result<()> {
        if self.main_dex_list_output.is_some()
            && self.main_dex_rules.is_none()
            && self.main_dex_list.is_none()
        {
            return Err(CompileError::input(
                "--main-dex-list-output",
                "requires --main-dex-rules and/or --main-dex-list",
            ));
        }
        if self.mode == CompilationMode::Debug && self.package_distribution.is_some() {
            return Err(CompileError::input(
                "--package-map",
                "package distribution is not supported in debug mode",
            ));
        }
        Ok(())
    }
}
