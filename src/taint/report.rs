//! Rendering of taint-analysis results.
//!
//! Per-function sections list the return-value taint, per-argument taint,
//! sinks still carrying summary ("half") taints, and the full flows whose
//! sources are entirely concrete.  Source/sink objects are JSON-like, with
//! `Func`, `aux`, `arg`, `callsite` and a one-level `wrapped` nesting.

use std::fmt::Write;

use crate::{
    context::Context,
    function::Function,
    instruction::InstOp,
    module::Module,
    taint::{
        driver::TaintAnalysis,
        token::{Category, TaintToken, TokenSet, RETVAL_INDEX},
        transfer::constant_gep_string,
    },
    value::Value,
};

fn json_str(s: &str) -> String {
    serde_json::to_string(s).expect("strings always serialize")
}

/// `["file","function",line,col]`, or a placeholder when the call site has
/// no debug location.
fn file_line_col(context: &Context, ins_val: Value) -> String {
    match ins_val.get_debug_loc(context) {
        Some(loc) => {
            let func_name = ins_val
                .get_instruction(context)
                .map(|ins| ins.parent.get_function(context).get_name(context))
                .unwrap_or("???");
            format!(
                "[{},{},{},{}]",
                json_str(&loc.file),
                json_str(func_name),
                loc.line,
                loc.col
            )
        }
        None => "[\"???\", -1, -1]".to_owned(),
    }
}

/// Render one source/sink object.  When `wrapper_indent` is given and the
/// token wraps an inner one, the inner token is rendered nested (one level).
pub fn token_to_string(
    analysis: &TaintAnalysis,
    context: &Context,
    token: &TaintToken,
    wrapper_indent: Option<&str>,
) -> String {
    if let Some(constant) = token.constant {
        let aux_string = constant_gep_string(context, constant).unwrap_or("");
        return format!("{{\"aux_file\":{}}}", json_str(aux_string));
    }

    let mut out = String::new();
    out.push_str("{\"Func\":");
    match token.func {
        Some(func) => out.push_str(&json_str(func.get_name(context))),
        None => out.push_str("\"null\""),
    }
    let _ = write!(out, ", \"aux\":\"{}\"", token.category.name());

    let is_wrapped = token.wrapped.is_some() && wrapper_indent.is_some();
    if !is_wrapped {
        let _ = write!(out, ", \"arg\":{}", token.arg_index);
    }

    out.push_str(", \"callsite\": ");
    match token.call_site {
        Some(call_site) => {
            out.push_str(&file_line_col(context, call_site));
            // Standard-stream arguments get called out by name: a
            // `File`-category argument loaded from the stdin/stdout/stderr
            // globals.
            if let (Some(func), Some(InstOp::Call(_, args))) = (
                token.func,
                call_site.get_instruction(context).map(|ins| &ins.op),
            ) {
                if let Some(sink_cats) = analysis.spec.arg_sink_cats.get(&func) {
                    for (ix_arg, cat) in sink_cats.iter().enumerate() {
                        if *cat != Category::File {
                            continue;
                        }
                        let Some(arg) = args.get(ix_arg) else {
                            continue;
                        };
                        if let Some(InstOp::Load(ptr)) =
                            arg.get_instruction(context).map(|ins| &ins.op)
                        {
                            if let Some(gvar) = ptr.get_global(context) {
                                let name = gvar.get_name(context);
                                if matches!(name, "stdin" | "stdout" | "stderr") {
                                    let _ = write!(out, ", \"FILE*\":\"{name}\"");
                                }
                            }
                        }
                    }
                }
            }
        }
        None => out.push_str("null"),
    }

    if is_wrapped {
        let inner = analysis.interner.resolve(token.wrapped.unwrap());
        let _ = write!(
            out,
            ", \"wrapped\": \n{}{}",
            wrapper_indent.unwrap(),
            token_to_string(analysis, context, &inner, None)
        );
    }

    out.push('}');
    out
}

fn summary_tokens<'a>(
    analysis: &'a TaintAnalysis,
    function: Function,
    sink: &TaintToken,
) -> Option<&'a TokenSet> {
    analysis.flows.get(&function).and_then(|s| s.get(sink))
}

/// Render one function's summary: return-value taint, per-argument taint,
/// and sinks carrying summary-bearing ("half") taints.
pub fn func_summary_to_string(
    analysis: &TaintAnalysis,
    context: &Context,
    function: Function,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "################## ");
    let _ = writeln!(out, "# Function: {}", function.get_name(context));

    let ret_sink = TaintToken::summary(function, RETVAL_INDEX);
    out.push_str("\"Return\": [");
    if let Some(ret_taint) = summary_tokens(analysis, function, &ret_sink) {
        for src in ret_taint {
            out.push_str(&token_to_string(analysis, context, src, None));
            out.push_str(", ");
        }
    }
    out.push_str("]\n");

    for (ix_arg, (arg_name, _)) in function.args_iter(context).enumerate() {
        let _ = write!(out, "Arg {ix_arg}: {arg_name}: ");
        let arg_sink = TaintToken::summary(function, ix_arg as i32);
        if let Some(arg_taint) = summary_tokens(analysis, function, &arg_sink) {
            for src in arg_taint {
                out.push_str(&token_to_string(analysis, context, src, None));
                out.push_str(", ");
            }
        }
        out.push('\n');
    }

    out.push_str("\"Sinks\": [\n");
    if let Some(summary) = analysis.flows.get(&function) {
        for (sink, taints) in summary {
            let (Some(call_site), true) = (sink.call_site, sink.arg_index != RETVAL_INDEX) else {
                continue;
            };
            let half_taints: Vec<&TaintToken> =
                taints.iter().filter(|taint| taint.is_summary()).collect();
            if half_taints.is_empty() {
                continue;
            }
            let callee_name = sink
                .func
                .map(|func| func.get_name(context))
                .unwrap_or("null");
            let _ = writeln!(
                out,
                "  [{}, \"{} arg {}\", [",
                file_line_col(context, call_site),
                callee_name,
                sink.arg_index
            );
            for src in half_taints {
                let _ = writeln!(
                    out,
                    "    {},",
                    token_to_string(analysis, context, src, None)
                );
            }
            out.push_str("  ]],\n");
        }
    }
    out.push_str("]\n");

    out
}

/// Render one function's full flows: concrete sinks whose recorded sources
/// are entirely concrete.  Auxiliary filename constants only count at
/// `file`-category sinks.
pub fn func_flows_to_string(
    analysis: &TaintAnalysis,
    context: &Context,
    function: Function,
) -> String {
    let mut out = String::new();
    let mut printed_header = false;

    if let Some(summary) = analysis.flows.get(&function) {
        for (sink, taints) in summary {
            let (Some(_), true) = (sink.call_site, sink.arg_index != RETVAL_INDEX) else {
                continue;
            };
            let full_taints: Vec<&TaintToken> = taints
                .iter()
                .filter(|taint| {
                    if taint.constant.is_some() && sink.category != Category::File {
                        return false;
                    }
                    !taint.is_summary()
                })
                .collect();
            if full_taints.is_empty() {
                continue;
            }
            if !printed_header {
                printed_header = true;
                let _ = writeln!(out, "################## ");
                let _ = writeln!(out, "# Function: {}", function.get_name(context));
                out.push_str("<flows>\n[\n");
            }
            let _ = writeln!(
                out,
                "  {{\"sink\": {},",
                token_to_string(analysis, context, sink, Some("      "))
            );
            out.push_str("   \"sources\": [\n");
            for src in full_taints {
                let _ = writeln!(
                    out,
                    "    {},",
                    token_to_string(analysis, context, src, Some("      "))
                );
            }
            out.push_str("  ]},\n");
        }
    }

    if !printed_header {
        let _ = writeln!(
            out,
            "Function {}: no full flows.",
            function.get_name(context)
        );
    } else {
        out.push_str("]\n</flows>\n");
    }
    out
}

/// The full report: summaries, full flows, and unrecognized externals.
pub fn report_to_string(analysis: &TaintAnalysis, context: &Context, module: Module) -> String {
    let mut out = String::new();
    out.push_str("\n############################################################\n");
    out.push_str("# Function summaries\n");
    out.push_str("############################################################\n");
    for function in module.function_iter(context) {
        if function.is_declaration(context) {
            continue;
        }
        out.push_str(&func_summary_to_string(analysis, context, function));
    }

    out.push_str("\n############################################################\n");
    out.push_str("# FULL FLOWS\n");
    out.push_str("############################################################\n");
    for function in module.function_iter(context) {
        if function.is_declaration(context) {
            continue;
        }
        out.push_str(&func_flows_to_string(analysis, context, function));
    }

    out.push_str("\n############################################################\n");
    out.push_str("Unrecognized external functions: [ ");
    for func in &analysis.unknown_externals {
        out.push_str(func.get_name(context));
        out.push(' ');
    }
    out.push_str("]\n");
    out
}
