//! Process-wide stack-trace translation.
//!
//! Errors raised from evaluated bundle code carry positions in the emitted
//! file. Once a translator is installed, [`translate_stack`] rewrites every
//! `path:line:column` location it can map back to original sources, reading
//! generated files and their maps through a caller-supplied retriever.
//!
//! There is exactly one translator per process. Installing again replaces it.

use base64::Engine;
use regex::{Captures, Regex};
use sourcemap::SourceMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use tracing::{debug, trace};

/// Reads a file's text, or `None` if it does not exist.
pub type RetrieveFile = Arc<dyn Fn(&Path) -> Option<String> + Send + Sync>;

const SOURCE_MAPPING_URL: &str = "sourceMappingURL=";
const DATA_URL_BASE64: &str = ";base64,";

/// Translator configuration.
#[derive(Clone)]
pub struct SourceMapOptions {
    /// Drop every parsed map before each translation, so rebuilt files are re-read.
    pub empty_cache_between_operations: bool,
    pub retrieve_file: RetrieveFile,
}

impl std::fmt::Debug for SourceMapOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceMapOptions")
            .field(
                "empty_cache_between_operations",
                &self.empty_cache_between_operations,
            )
            .finish_non_exhaustive()
    }
}

struct Translator {
    options: SourceMapOptions,
    /// Parsed maps keyed by generated file; `None` records a file without one.
    cache: Mutex<HashMap<PathBuf, Option<Arc<SourceMap>>>>,
}

static TRANSLATOR: RwLock<Option<Arc<Translator>>> = RwLock::new(None);

fn frame_regex() -> &'static Regex {
    static FRAME: OnceLock<Regex> = OnceLock::new();
    FRAME.get_or_init(|| {
        Regex::new(r"(?P<file>(?:file://)?[^\s()]+?):(?P<line>\d+):(?P<col>\d+)")
            .expect("frame pattern is valid")
    })
}

/// Install the process-wide translator, replacing any previous one.
pub fn install(options: SourceMapOptions) {
    debug!(
        empty_cache = options.empty_cache_between_operations,
        "installing stack trace translator"
    );
    let translator = Arc::new(Translator {
        options,
        cache: Mutex::new(HashMap::new()),
    });
    *TRANSLATOR.write().unwrap_or_else(PoisonError::into_inner) = Some(translator);
}

#[must_use]
pub fn is_installed() -> bool {
    TRANSLATOR
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .is_some()
}

/// Rewrite the locations in `stack` through the installed translator.
///
/// Without a translator, or for frames that cannot be mapped, text is
/// returned unchanged.
#[must_use]
pub fn translate_stack(stack: &str) -> String {
    let translator = TRANSLATOR
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    match translator {
        Some(translator) => translator.translate(stack),
        None => stack.to_string(),
    }
}

#[cfg(test)]
pub(crate) fn uninstall() {
    *TRANSLATOR.write().unwrap_or_else(PoisonError::into_inner) = None;
}

impl Translator {
    fn translate(&self, stack: &str) -> String {
        if self.options.empty_cache_between_operations {
            self.cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }

        frame_regex()
            .replace_all(stack, |caps: &Captures<'_>| {
                self.map_frame(caps)
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    fn map_frame(&self, caps: &Captures<'_>) -> Option<String> {
        let file = &caps["file"];
        let file = file.strip_prefix("file://").unwrap_or(file);
        let line: u32 = caps["line"].parse().ok()?;
        let col: u32 = caps["col"].parse().ok()?;

        let generated = Path::new(file);
        let map = self.source_map_for(generated)?;
        let dst_line = line.checked_sub(1)?;
        let token = map.lookup_token(dst_line, col.saturating_sub(1))?;
        // lookup_token falls back to tokens on earlier lines; those belong to other code.
        if token.get_dst_line() != dst_line {
            return None;
        }
        let source = token.get_source()?;

        let source = if source.contains("://") || Path::new(source).is_absolute() {
            source.to_string()
        } else {
            generated
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join(source)
                .display()
                .to_string()
        };

        trace!(file, line, col, source = %source, "mapped frame");
        Some(format!(
            "{}:{}:{}",
            source,
            token.get_src_line() + 1,
            token.get_src_col() + 1
        ))
    }

    fn source_map_for(&self, generated: &Path) -> Option<Arc<SourceMap>> {
        if let Some(cached) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(generated)
        {
            return cached.clone();
        }

        let map = self.load_source_map(generated).map(Arc::new);
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(generated.to_path_buf(), map.clone());
        map
    }

    fn load_source_map(&self, generated: &Path) -> Option<SourceMap> {
        let retrieve = &self.options.retrieve_file;
        let code = retrieve(generated)?;
        let url = source_mapping_url(&code)?;

        let raw = if let Some(data) = url.strip_prefix("data:") {
            let (_, encoded) = data.split_once(DATA_URL_BASE64)?;
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .ok()?
        } else {
            let map_path = generated
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join(url);
            retrieve(&map_path)?.into_bytes()
        };

        SourceMap::from_slice(&raw).ok()
    }
}

/// The last `sourceMappingURL=` annotation in `code`.
fn source_mapping_url(code: &str) -> Option<&str> {
    code.lines()
        .rev()
        .filter_map(|line| {
            let line = line.trim();
            let rest = line
                .strip_prefix("//#")
                .or_else(|| line.strip_prefix("//@"))?
                .trim_start();
            rest.strip_prefix(SOURCE_MAPPING_URL)
        })
        .map(str::trim)
        .find(|url| !url.is_empty())
}
