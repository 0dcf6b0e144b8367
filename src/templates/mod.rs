//! Loads, compiles and caches message templates.
//!
//! Templates are Tera documents. Each file declares a macro named after the
//! file's base name with a `_message` suffix, e.g. `feishu.tmpl` declares
//! `{% macro feishu_message(alerts, status) %}`. Compilation wraps the file in
//! a small entry template that imports it and invokes that macro, so callers
//! only ever render the entry.
//!
//! The cache lives for the whole process. There is no invalidation: editing a
//! template on disk requires a restart.

pub mod helpers;

use chrono_tz::Tz;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tera::{Context, Tera};
use thiserror::Error;
use tracing::{debug, info};

const ENTRY_TEMPLATE: &str = "__entry__";

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("failed to read template {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to compile template {path}: {message}")]
    Compile { path: PathBuf, message: String },

    #[error("failed to render '{name}': {message}")]
    Render { name: String, message: String },
}

/// Derives the sub-template (macro) name for a template path: the file name
/// without directory and extension, followed by `_message`.
pub fn sub_template_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{stem}_message")
}

/// A template file compiled together with its entry point.
pub struct CompiledTemplate {
    tera: Tera,
    sub_template: String,
}

impl CompiledTemplate {
    /// The macro this template renders.
    pub fn sub_template(&self) -> &str {
        &self.sub_template
    }

    /// Evaluates the sub-template against a rendering context.
    pub fn render(&self, context: &Context) -> Result<String, TemplateError> {
        self.tera
            .render(ENTRY_TEMPLATE, context)
            .map_err(|e| TemplateError::Render {
                name: self.sub_template.clone(),
                message: describe(&e),
            })
    }
}

impl std::fmt::Debug for CompiledTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledTemplate")
            .field("sub_template", &self.sub_template)
            .finish_non_exhaustive()
    }
}

/// Process-wide cache of compiled templates keyed by path.
pub struct TemplateCache {
    timezone: Tz,
    templates: RwLock<HashMap<PathBuf, Arc<CompiledTemplate>>>,
    compilations: AtomicUsize,
}

impl TemplateCache {
    /// Creates an empty cache whose templates format timestamps in `timezone`.
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            templates: RwLock::new(HashMap::new()),
            compilations: AtomicUsize::new(0),
        }
    }

    /// Returns the compiled template for `path`, compiling it on first use.
    ///
    /// Failed compilations are not cached.
    pub fn resolve(&self, path: &Path) -> Result<Arc<CompiledTemplate>, TemplateError> {
        {
            let templates = self.templates.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(template) = templates.get(path) {
                return Ok(template.clone());
            }
        }

        let mut templates = self.templates.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have compiled it while we waited for the write lock.
        if let Some(template) = templates.get(path) {
            debug!(path = %path.display(), "Template compiled by a concurrent caller");
            return Ok(template.clone());
        }

        let template = Arc::new(self.compile(path)?);
        templates.insert(path.to_path_buf(), template.clone());
        info!(
            path = %path.display(),
            sub_template = template.sub_template(),
            "Template loaded"
        );
        Ok(template)
    }

    /// Number of compilations performed so far, including failed ones.
    pub fn compile_count(&self) -> usize {
        self.compilations.load(Ordering::SeqCst)
    }

    fn compile(&self, path: &Path) -> Result<CompiledTemplate, TemplateError> {
        self.compilations.fetch_add(1, Ordering::SeqCst);

        let source = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let sub_template = sub_template_name(path);
        let entry = format!(
            "{{% import \"{file_name}\" as provider %}}\
             {{{{ provider::{sub_template}(alerts=alerts, status=status, receiver=receiver, \
             group_labels=group_labels, common_labels=common_labels, \
             common_annotations=common_annotations, external_url=external_url) }}}}"
        );

        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        helpers::register(&mut tera, self.timezone);
        tera.add_raw_templates(vec![
            (file_name.as_str(), source.as_str()),
            (ENTRY_TEMPLATE, entry.as_str()),
        ])
        .map_err(|e| TemplateError::Compile {
            path: path.to_path_buf(),
            message: describe(&e),
        })?;

        Ok(CompiledTemplate { tera, sub_template })
    }
}

/// Flattens a Tera error and its causes into one line.
fn describe(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
