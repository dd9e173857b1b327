//! CLI command implementations
//!
//! Every command writes to an injected writer so it can be exercised
//! against a `MemoryBackend` in tests. Logging and progress go to stderr.

use crate::backend::{Backend, MountKind, VersionMeta};
use crate::config::{
    ExportArgs, GetArgs, ImportArgs, LsArgs, PathsArgs, TreeArgs, VersionsArgs, DEFAULT_PATH,
};
use crate::error::{BackendError, ConfigError, Result};
use crate::export::{
    collect_secrets, import, ExportDocument, ExportOptions, ImportOptions, SecretMap,
};
use crate::path::{canonicalize, dedupe_paths, SecretPath};
use crate::progress::ProgressReporter;
use crate::tree::{TreeBuilder, TreeNode, TreeOptions};
use console::Style;
use std::io::{self, Read, Write};
use tracing::{debug, info};

/// Shared state for running commands against one backend
pub struct Session<'b, B: Backend + ?Sized> {
    backend: &'b B,
    color: bool,
    progress: bool,
    workers: Option<usize>,
}

impl<'b, B: Backend + ?Sized> Session<'b, B> {
    pub fn new(backend: &'b B) -> Self {
        Self {
            backend,
            color: false,
            progress: false,
            workers: None,
        }
    }

    /// Colour output
    pub fn color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Show a spinner on stderr while crawling
    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Override the tree worker pool size
    pub fn workers(mut self, workers: Option<usize>) -> Self {
        self.workers = workers;
        self
    }

    fn paint(&self, text: &str, style: Style) -> String {
        if self.color {
            style.force_styling(true).apply_to(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn construct(&self, path: &str, options: TreeOptions) -> Result<TreeNode> {
        let mut builder = TreeBuilder::new(self.backend);
        if let Some(workers) = self.workers {
            builder = builder.workers(workers);
        }

        if !self.progress {
            return Ok(builder.construct(path, options)?);
        }

        let reporter = ProgressReporter::new(path);
        let result = builder.construct_with_progress(path, options, |p| reporter.update(&p));
        reporter.finish_and_clear();
        Ok(result?)
    }

    /// `ls`: mounts at the root, otherwise the entries of each path
    pub fn ls<W: Write>(&self, args: &LsArgs, out: &mut W) -> Result<()> {
        let paths = if args.paths.is_empty() {
            vec!["/".to_string()]
        } else {
            args.paths.clone()
        };

        for path in &paths {
            let canonical = canonicalize(path);
            let entries: Vec<String> = if canonical.is_empty() {
                let mut mounts = self.backend.mounts(MountKind::Generic)?;
                mounts.extend(self.backend.mounts(MountKind::Kv)?);
                mounts.into_iter().map(|m| format!("{}/", m)).collect()
            } else {
                self.backend.list(&canonical)?
            };

            let mut entries = if args.quick {
                entries
            } else {
                self.without_deleted(&canonical, entries)?
            };
            entries.sort();

            if paths.len() > 1 {
                writeln!(out, "{}:", self.paint(path, Style::new().cyan()))?;
            }
            self.display_entries(&entries, args.single, out)?;
            if paths.len() > 1 {
                writeln!(out)?;
            }
        }
        Ok(())
    }

    /// Drop v2 secrets whose latest version no longer reads
    fn without_deleted(&self, parent: &str, entries: Vec<String>) -> Result<Vec<String>> {
        let mut kept = Vec::with_capacity(entries.len());
        for entry in entries {
            if !entry.ends_with('/') {
                let full = format!("{}/{}", parent, entry);
                if self.backend.mount_version(&full)?.is_versioned() {
                    match self.backend.read(&full, None) {
                        Ok(_) => {}
                        Err(e) if e.is_not_found() => {
                            debug!(path = %full, "Hiding deleted secret");
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            kept.push(entry);
        }
        Ok(kept)
    }

    fn display_entries<W: Write>(&self, entries: &[String], single: bool, out: &mut W) -> Result<()> {
        for entry in entries {
            let style = if entry.ends_with('/') {
                Style::new().blue()
            } else {
                Style::new().green()
            };
            if single {
                writeln!(out, "{}", self.paint(entry, style))?;
            } else {
                write!(out, "{}  ", self.paint(entry, style))?;
            }
        }
        if !single {
            writeln!(out)?;
        }
        Ok(())
    }

    /// `tree`: draw each path's tree
    pub fn tree<W: Write>(&self, args: &TreeArgs, out: &mut W) -> Result<()> {
        if args.hide_leaves && args.keys {
            return Err(ConfigError::ConflictingFlags {
                first: "-d",
                second: "--keys",
            }
            .into());
        }

        let options = TreeOptions {
            fetch_keys: args.keys,
            allow_deleted_keys: args.quick,
            fetch_all_versions: false,
        };

        for path in default_paths(&args.paths) {
            let tree = self.construct(&path, options)?;
            write!(out, "{}", tree.draw(self.color, !args.hide_leaves))?;
        }
        Ok(())
    }

    /// `paths`: every leaf path, one per line
    pub fn paths<W: Write>(&self, args: &PathsArgs, out: &mut W) -> Result<()> {
        let options = TreeOptions {
            fetch_keys: args.keys,
            allow_deleted_keys: args.quick,
            fetch_all_versions: false,
        };

        for path in default_paths(&args.paths) {
            let tree = self.construct(&path, options)?;
            for leaf in tree.paths() {
                writeln!(out, "{}", leaf)?;
            }
        }
        Ok(())
    }

    /// `get`: one value, or every `key: value` of each secret
    pub fn get<W: Write>(&self, args: &GetArgs, out: &mut W) -> Result<()> {
        let multiple = args.paths.len() > 1;

        for raw in &args.paths {
            let target = SecretPath::parse(raw)?;
            let data = self.backend.read(&target.path, target.version)?;

            if multiple {
                writeln!(out, "{}:", target.path)?;
            }
            let indent = if multiple { "  " } else { "" };

            match &target.key {
                Some(key) => {
                    let value = data.get(key).ok_or_else(|| BackendError::NotFound {
                        path: format!("{}:{}", target.path, key),
                    })?;
                    if args.keys {
                        writeln!(out, "{}{}", indent, key)?;
                    } else if multiple {
                        writeln!(out, "{}{}: {}", indent, key, value)?;
                    } else {
                        writeln!(out, "{}", value)?;
                    }
                }
                None => {
                    for (key, value) in &data {
                        if args.keys {
                            writeln!(out, "{}{}", indent, key)?;
                        } else {
                            writeln!(out, "{}{}: {}", indent, key, value)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// `versions`: version table of each secret
    pub fn versions<W: Write>(&self, args: &VersionsArgs, out: &mut W) -> Result<()> {
        for (i, raw) in args.paths.iter().enumerate() {
            let target = SecretPath::parse(raw)?;
            if target.version.is_some() {
                return Err(ConfigError::InvalidPath {
                    path: raw.clone(),
                    reason: "specifying a version is not supported here".into(),
                }
                .into());
            }

            let versions = self.backend.versions(&target.path)?;
            if args.paths.len() > 1 {
                writeln!(out, "{}:", self.paint(&target.path, Style::new().blue()))?;
            }
            self.version_table(&versions, out)?;
            if args.paths.len() > 1 && i + 1 != args.paths.len() {
                writeln!(out)?;
            }
        }
        Ok(())
    }

    fn version_table<W: Write>(&self, versions: &[VersionMeta], out: &mut W) -> Result<()> {
        let header = ["version", "status", "created at"];
        let rows: Vec<[String; 3]> = versions
            .iter()
            .map(|v| {
                let created = v
                    .created_at
                    .map(|t| t.format("%d %b %y %H:%M UTC").to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                [v.number.to_string(), v.state().to_string(), created]
            })
            .collect();

        let width = |col: usize| {
            rows.iter()
                .map(|r| r[col].len())
                .chain(std::iter::once(header[col].len()))
                .max()
                .unwrap_or(0)
        };
        let (w0, w1) = (width(0), width(1));

        writeln!(out, "{:<w0$}  {:<w1$}  {}", header[0], header[1], header[2])?;
        for row in &rows {
            let status = format!("{:<w1$}", row[1]);
            let style = match row[1].as_str() {
                "destroyed" => Style::new().red(),
                "deleted" => Style::new().yellow(),
                _ => Style::new().green(),
            };
            writeln!(out, "{:<w0$}  {}  {}", row[0], self.paint(&status, style), row[2])?;
        }
        Ok(())
    }

    /// `export`: JSON backup of one or more subtrees
    pub fn export<W: Write>(&self, args: &ExportArgs, out: &mut W) -> Result<()> {
        let mut paths = Vec::new();
        for raw in default_paths(&args.paths) {
            let target = SecretPath::parse(&raw)?;
            if target.key.is_some() {
                return Err(ConfigError::InvalidPath {
                    path: raw,
                    reason: "cannot export a path with a key".into(),
                }
                .into());
            }
            if target.version.is_some() {
                return Err(ConfigError::InvalidPath {
                    path: raw,
                    reason: "cannot export a path with a version".into(),
                }
                .into());
            }
            paths.push(target.path);
        }

        let options = TreeOptions {
            fetch_keys: true,
            allow_deleted_keys: args.deleted,
            fetch_all_versions: args.all,
        };

        let mut secrets = SecretMap::new();
        for path in dedupe_paths(&paths) {
            let tree = self.construct(&path, options)?;
            secrets.extend(collect_secrets(tree));
        }

        let document = ExportDocument::build(
            self.backend,
            &secrets,
            ExportOptions {
                include_deleted: args.deleted,
                shallow: args.shallow,
            },
        )?;
        info!(
            secrets = secrets.len(),
            versioned = document.is_versioned(),
            "Export assembled"
        );

        writeln!(out, "{}", document.to_json()?)?;
        Ok(())
    }

    /// `import`: write an export file (or stdin) into the backend
    pub fn import<W: Write>(&self, args: &ImportArgs, out: &mut W) -> Result<()> {
        let input = match &args.file {
            Some(file) => std::fs::read_to_string(file)?,
            None => {
                let mut buf = String::new();
                io::stdin().read_to_string(&mut buf)?;
                buf
            }
        };

        let document = ExportDocument::parse(&input)?;
        let summary = import(
            self.backend,
            &document,
            ImportOptions {
                ignore_deleted: args.ignore_deleted,
                shallow: args.shallow,
                ignore_destroyed: args.ignore_destroyed,
            },
        )?;

        writeln!(
            out,
            "imported {} secrets ({} versions written, {} padded, {} skipped)",
            summary.secrets, summary.written, summary.padded, summary.skipped
        )?;
        Ok(())
    }
}

fn default_paths(paths: &[String]) -> Vec<String> {
    if paths.is_empty() {
        vec![DEFAULT_PATH.to_string()]
    } else {
        paths.to_vec()
    }
}
