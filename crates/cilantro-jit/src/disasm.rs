//! CIL disassembly with try/handler bracketing, for the driver's `dump`
//! command and for diagnostics when a method fails verification.

use crate::JitError;
use cilantro_metadata::{InsnDecoder, Operand};
use cilantro_types::{ClauseKind, Universe};
use cilantro_utils::MethodId;
use std::fmt::Write;

/// Render a method body as annotated CIL.
pub fn disassemble(u: &Universe, method: MethodId) -> Result<String, JitError> {
    let Some(body) = u.method_body(method) else {
        return Ok(String::from("    <no body>\n"));
    };
    let assembly = u.with_method(method, |m| m.assembly);
    let mut out = String::new();
    let mut indent = 0usize;
    let mut decoder = InsnDecoder::new(&body.il);

    while let Some(op) = decoder.next()? {
        let pc = op.offset;

        for clause in &body.clauses {
            if clause.try_offset == pc {
                let _ = writeln!(out, "{:indent$}.try {{", "");
                indent += 4;
            } else if clause.try_offset + clause.try_length == pc {
                indent = indent.saturating_sub(4);
                let _ = writeln!(out, "{:indent$}}} // end .try", "");
            }
            if clause.handler_offset == pc {
                let heading = match clause.kind {
                    ClauseKind::Catch(t) => format!("catch {}", u.full_type_name(t)),
                    ClauseKind::Filter { .. } => "filter".to_string(),
                    ClauseKind::Finally => "finally".to_string(),
                    ClauseKind::Fault => "fault".to_string(),
                };
                let _ = writeln!(out, "{:indent$}{heading} {{", "");
                indent += 4;
            } else if clause.handler_offset + clause.handler_length == pc {
                indent = indent.saturating_sub(4);
                let _ = writeln!(out, "{:indent$}}} // end handler", "");
            }
        }

        let param = match &op.operand {
            Operand::None => String::new(),
            Operand::Int32(v) => format!(" {v}"),
            Operand::Int64(v) => format!(" {v}"),
            Operand::Float32(v) => format!(" {v:?}"),
            Operand::Float64(v) => format!(" {v:?}"),
            Operand::Var(v) => format!(" V_{v}"),
            Operand::Target(t) => format!(" IL_{t:04x}"),
            Operand::Switch(targets) => {
                let list: Vec<String> =
                    targets.iter().map(|t| format!("IL_{t:04x}")).collect();
                format!(" ({})", list.join(", "))
            }
            Operand::Token(token) => match token.table {
                cilantro_metadata::table::USER_STRING => {
                    match u.user_string(assembly, *token) {
                        Ok(s) => format!(" \"{s}\""),
                        Err(_) => format!(" {token}"),
                    }
                }
                cilantro_metadata::table::METHOD_DEF
                | cilantro_metadata::table::MEMBER_REF => {
                    match u.resolve_method_token(assembly, *token) {
                        Ok(m) => format!(" {}", u.method_symbol(m)),
                        Err(_) => match u.resolve_field_token(assembly, *token) {
                            Ok(f) => format!(" {}", u.field_symbol(f)),
                            Err(_) => format!(" {token}"),
                        },
                    }
                }
                cilantro_metadata::table::FIELD => {
                    match u.resolve_field_token(assembly, *token) {
                        Ok(f) => format!(" {}", u.field_symbol(f)),
                        Err(_) => format!(" {token}"),
                    }
                }
                _ => match u.resolve_type_token(assembly, *token, &[], &[]) {
                    Ok(Some(t)) => format!(" {}", u.full_type_name(t)),
                    _ => format!(" {token}"),
                },
            },
        };

        let _ = writeln!(
            out,
            "{:indent$}IL_{pc:04x}:  {}{param}",
            "",
            op.opcode.name()
        );
    }
    Ok(out)
}
