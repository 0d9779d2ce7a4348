//! Loading of the external analysis specification.
//!
//! Three whitespace- and line-oriented text files describe the external
//! world: sources and sinks of system APIs, taint copiers (routines whose
//! semantics copy data between their arguments, e.g. `memcpy`), and wrapper
//! functions whose sinks should be attributed to both the wrapper and the
//! wrapped system API.
//!
//! Malformed lines are warned about and skipped; names that don't resolve to
//! a module function are dropped.  Only a missing required file is fatal.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    context::Context,
    error::IrError,
    function::Function,
    module::Module,
    taint::token::{Category, TaintToken, TokenSet, RETVAL_INDEX},
};

/// Locations of the three specification files.
#[derive(Debug, Clone)]
pub struct TaintConfig {
    pub sources_and_sinks: PathBuf,
    pub taint_copiers: PathBuf,
    /// Optional; `None` disables wrapper handling.
    pub wrappers: Option<PathBuf>,
}

/// The loaded, name-resolved specification tables.
#[derive(Default)]
pub struct TaintSpec {
    /// Per-argument source categories, fixed parameters only.
    pub arg_src_cats: FxHashMap<Function, Vec<Category>>,
    /// Per-argument sink categories; variadic functions get one extra slot
    /// whose category extends to all variadic actuals.
    pub arg_sink_cats: FxHashMap<Function, Vec<Category>>,
    /// Return-value source category.
    pub ret_cat: FxHashMap<Function, Category>,
    /// Functions modeled as taint copiers.
    pub copiers: FxHashSet<Function>,
    /// Copier summaries, installed into the flow table at load time and
    /// immutable afterwards.
    pub copier_summaries: FxHashMap<Function, BTreeMap<TaintToken, TokenSet>>,
    /// Functions treated as wrappers at call sites.
    pub wrappers: FxHashSet<Function>,
    /// Every function any specification file resolved.
    pub known_external: FxHashSet<Function>,
}

impl TaintSpec {
    /// Load and resolve all specification files against `module`.
    pub fn load(
        context: &Context,
        module: Module,
        config: &TaintConfig,
    ) -> Result<TaintSpec, IrError> {
        let mut spec = TaintSpec::default();
        spec.load_sources_and_sinks(context, module, &config.sources_and_sinks)?;
        spec.load_wrappers(context, module, config.wrappers.as_ref());
        spec.load_taint_copiers(context, module, &config.taint_copiers)?;
        Ok(spec)
    }

    /// Resolve a specification name to a module function: direct lookup,
    /// then an `llvm.<name>` prefix match for intrinsics such as `memcpy`.
    fn resolve_function(context: &Context, module: Module, name: &str) -> Option<Function> {
        if let Some(func) = module.get_function(context, name) {
            return Some(func);
        }
        let intrinsic_prefix = format!("llvm.{name}");
        module
            .function_iter(context)
            .find(|func| func.get_name(context).starts_with(&intrinsic_prefix))
    }

    fn read_spec_file(path: &PathBuf) -> Result<String, IrError> {
        std::fs::read_to_string(path)
            .map_err(|err| IrError::SpecFileUnreadable(path.display().to_string(), err.to_string()))
    }

    /// One line per external function:
    /// `<name> <cat>*` where `<cat>` is `-`, `Src`, `Sink`, `SrcAndSink` or
    /// `none`, optionally prefixed with `File`; a `->` switches subsequent
    /// categories to the return-value slot.
    fn load_sources_and_sinks(
        &mut self,
        context: &Context,
        module: Module,
        path: &PathBuf,
    ) -> Result<(), IrError> {
        let text = Self::read_spec_file(path)?;
        let mut num_found = 0usize;
        let mut num_missing = 0usize;

        for line in text.lines() {
            let mut words = line.split_whitespace();
            let Some(func_name) = words.next() else {
                continue;
            };
            let Some(func) = Self::resolve_function(context, module, func_name) else {
                num_missing += 1;
                continue;
            };
            self.known_external.insert(func);
            num_found += 1;

            let num_params = func.num_args(context);
            let is_variadic = func.is_variadic(context);
            let mut src_cats = vec![Category::Null; num_params];
            let mut sink_cats = vec![Category::Null; num_params + usize::from(is_variadic)];
            let mut ret_cat = Category::Null;

            let mut ix_arg = 0usize;
            let mut is_ret = false;
            for word in words {
                if word == "-" {
                    if !is_ret {
                        ix_arg += 1;
                    }
                    continue;
                }
                if word == "->" {
                    is_ret = true;
                    continue;
                }
                let mut cat = Category::Main;
                let mut word = word;
                if let Some(rest) = word.strip_prefix("File") {
                    cat = Category::File;
                    word = rest;
                }
                let (is_src, is_sink) = match word {
                    "Src" => (true, false),
                    "Sink" => (false, true),
                    "SrcAndSink" => (true, true),
                    "none" => (false, false),
                    other => {
                        tracing::warn!(
                            "unrecognized catcode '{other}', function {func_name}"
                        );
                        (false, false)
                    }
                };
                if is_ret {
                    if is_src {
                        ret_cat = cat;
                    }
                    if is_sink {
                        tracing::warn!("{func_name}: return value cannot be a sink");
                    }
                } else {
                    if ix_arg >= num_params && !is_variadic {
                        tracing::warn!("{func_name}: too many arguments");
                        ix_arg += 1;
                        continue;
                    }
                    if is_src {
                        if ix_arg < num_params {
                            src_cats[ix_arg] = cat;
                        } else {
                            tracing::warn!(
                                "{func_name}: source category on variadic arguments is not supported"
                            );
                        }
                    }
                    if is_sink {
                        let sink_ix = ix_arg.min(sink_cats.len() - 1);
                        sink_cats[sink_ix] = cat;
                    }
                    ix_arg += 1;
                }
            }

            self.arg_src_cats.insert(func, src_cats);
            self.arg_sink_cats.insert(func, sink_cats);
            self.ret_cat.insert(func, ret_cat);
        }

        tracing::info!(
            "Found {num_found} source/sink functions in program; {num_missing} are absent."
        );
        Ok(())
    }

    /// One line per function:
    /// `<name> ( <arg> -> [ <flow> , ... ] , ... )`, each named argument
    /// declaring data flow from the listed arguments into it.  `return` is a
    /// reserved argument name meaning the return value.
    fn load_taint_copiers(
        &mut self,
        context: &Context,
        module: Module,
        path: &PathBuf,
    ) -> Result<(), IrError> {
        let text = Self::read_spec_file(path)?;
        for line in text.lines() {
            if line.split_whitespace().next().is_none() {
                continue;
            }
            let Some((func_name, arg_decls)) = parse_copier_line(line) else {
                tracing::warn!("taint-copiers line formatted incorrectly: {line}");
                continue;
            };
            let Some(func) = Self::resolve_function(context, module, &func_name) else {
                continue;
            };
            self.known_external.insert(func);
            self.copiers.insert(func);

            // Index arguments first because flows may refer back at them.
            // `return` keeps its reserved index and does not consume a
            // positional slot.
            let mut arg_idx = FxHashMap::<&str, i32>::default();
            arg_idx.insert("return", RETVAL_INDEX);
            let mut next_idx = 0i32;
            for (arg_name, _) in &arg_decls {
                if arg_name != "return" {
                    arg_idx.insert(arg_name.as_str(), next_idx);
                    next_idx += 1;
                }
            }

            let summary = self.copier_summaries.entry(func).or_default();
            for (arg_name, flows) in &arg_decls {
                let dst_sink = TaintToken::summary(func, arg_idx[arg_name.as_str()]);
                for flow_name in flows {
                    if flow_name == "return" {
                        tracing::warn!(
                            "taint copier {func_name}: the return value cannot be a flow source"
                        );
                        continue;
                    }
                    match arg_idx.get(flow_name.as_str()) {
                        Some(src_ix) => {
                            summary
                                .entry(dst_sink)
                                .or_default()
                                .insert(TaintToken::summary(func, *src_ix));
                        }
                        None => {
                            tracing::warn!(
                                "taint copier {func_name}: unknown argument '{flow_name}'"
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// One function name per line.
    fn load_wrappers(&mut self, context: &Context, module: Module, path: Option<&PathBuf>) {
        let Some(path) = path else {
            tracing::debug!("No wrappers file specified.");
            return;
        };
        let text = match Self::read_spec_file(path) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!("{err}");
                return;
            }
        };
        for line in text.lines() {
            let Some(func_name) = line.split_whitespace().next() else {
                continue;
            };
            match module.get_function(context, func_name) {
                Some(func) => {
                    self.wrappers.insert(func);
                }
                None => {
                    tracing::warn!("Failed to find wrapper function {func_name}");
                }
            }
        }
    }
}

/// Parse one taint-copiers line into `(name, [(arg, [flows…])…])`.
///
/// The grammar is token-oriented: `name ( a -> [ b , c ] , d -> [ ] )`.
fn parse_copier_line(line: &str) -> Option<(String, Vec<(String, Vec<String>)>)> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let func_name = (*words.first()?).to_owned();
    if words.get(1) != Some(&"(") || words.last() != Some(&")") {
        return None;
    }
    let inner = &words[2..words.len() - 1];

    let mut decls = Vec::new();
    let mut i = 0usize;
    while i < inner.len() {
        let arg_name = (*inner.get(i)?).to_owned();
        if inner.get(i + 1) != Some(&"->") || inner.get(i + 2) != Some(&"[") {
            return None;
        }
        i += 3;
        let mut flows = Vec::new();
        loop {
            let word = *inner.get(i)?;
            i += 1;
            match word {
                "]" => break,
                "," => continue,
                name => flows.push(name.to_owned()),
            }
        }
        decls.push((arg_name, flows));
        if i < inner.len() {
            if inner.get(i) != Some(&",") {
                return None;
            }
            i += 1;
        }
    }
    Some((func_name, decls))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copier_lines_parse() {
        let (name, decls) =
            parse_copier_line("memcpy ( dest -> [ src ] , src -> [ ] , return -> [ dest ] )")
                .unwrap();
        assert_eq!(name, "memcpy");
        assert_eq!(
            decls,
            vec![
                ("dest".to_owned(), vec!["src".to_owned()]),
                ("src".to_owned(), vec![]),
                ("return".to_owned(), vec!["dest".to_owned()]),
            ]
        );

        let (_, decls) = parse_copier_line("strncat ( s1 -> [ s1 , s2 ] )").unwrap();
        assert_eq!(
            decls,
            vec![("s1".to_owned(), vec!["s1".to_owned(), "s2".to_owned()])]
        );

        assert!(parse_copier_line("malformed ( a -> b )").is_none());
        assert!(parse_copier_line("noparens a -> [ b ]").is_none());
    }
}
