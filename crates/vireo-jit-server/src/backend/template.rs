//! Template backend
//!
//! Emits a deterministic pseudo-encoding: a fixed prolog, one fixed-width
//! record per operation, and a fixed epilog. The bytes are never executed
//! server-side; they exercise the full codegen path (validation, sizing,
//! address assignment, output packaging) without a native code generator.

use super::traits::{CodegenBackend, CodegenError, CompileContext, CompiledCode};
use vireo_jit_proto::bytecode::{JitBody, JitOp};

/// Prolog template: push frame, establish base
const PROLOG: [u8; 4] = [0x55, 0x48, 0x89, 0xE5];
/// Epilog template: restore frame, return
const EPILOG: [u8; 2] = [0x5D, 0xC3];

/// Deterministic non-executing backend, always compiled in
#[derive(Debug, Default)]
pub struct TemplateBackend;

impl TemplateBackend {
    /// New template backend
    pub fn new() -> Self {
        Self
    }

    fn encode_op(op: &JitOp, out: &mut Vec<u8>) {
        // One tag byte plus a 4-byte LE operand, fixed width per record.
        let (tag, operand): (u8, u32) = match *op {
            JitOp::ConstNum(i) => (0x01, i as u32),
            JitOp::ConstInt(v) => (0x02, v as u32),
            JitOp::PageConst(i) => (0x03, i as u32),
            JitOp::LoadArg(n) => (0x04, n as u32),
            JitOp::LoadGlobalThis => (0x05, 0),
            JitOp::Add => (0x10, 0),
            JitOp::Sub => (0x11, 0),
            JitOp::Mul => (0x12, 0),
            JitOp::Div => (0x13, 0),
            JitOp::Neg => (0x14, 0),
            JitOp::Eq => (0x20, 0),
            JitOp::Lt => (0x21, 0),
            JitOp::Le => (0x22, 0),
            JitOp::Jump(d) => (0x30, d as u32),
            JitOp::JumpIfFalse(d) => (0x31, d as u32),
            JitOp::LoadProperty(i) => (0x40, i as u32),
            JitOp::StoreProperty(i) => (0x41, i as u32),
            JitOp::Return => (0x50, 0),
        };
        out.push(tag);
        out.extend_from_slice(&operand.to_le_bytes());
    }
}

impl CodegenBackend for TemplateBackend {
    fn name(&self) -> &str {
        "template"
    }

    fn compile(
        &self,
        body: &JitBody,
        ctx: &CompileContext<'_>,
    ) -> Result<CompiledCode, CodegenError> {
        body.validate(
            ctx.inline_caches.len() as u16,
            ctx.page_constants.len() as u16,
        )?;

        let mut code = Vec::with_capacity(PROLOG.len() + body.ops.len() * 5 + EPILOG.len());
        code.extend_from_slice(&PROLOG);
        for op in &body.ops {
            Self::encode_op(op, &mut code);
        }
        code.extend_from_slice(&EPILOG);

        Ok(CompiledCode {
            code,
            entry_offset: 0,
            prolog_size: PROLOG.len() as u32,
            frame_size: 32 + 8 * body.arg_count as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>() -> CompileContext<'a> {
        CompileContext {
            inline_caches: &[],
            global_this_addr: 0,
            page_constants: &[],
        }
    }

    fn body(ops: Vec<JitOp>) -> JitBody {
        JitBody {
            body_id: 1,
            name: "f".to_string(),
            arg_count: 2,
            consts: vec![1.0],
            ops,
        }
    }

    #[test]
    fn test_template_output_is_deterministic() {
        let b = body(vec![JitOp::LoadArg(0), JitOp::LoadArg(1), JitOp::Add, JitOp::Return]);
        let backend = TemplateBackend::new();
        let first = backend.compile(&b, &ctx()).unwrap();
        let second = backend.compile(&b, &ctx()).unwrap();
        assert_eq!(first.code, second.code);
        assert_eq!(first.code.len(), 4 + 4 * 5 + 2);
        assert_eq!(first.prolog_size, 4);
    }

    #[test]
    fn test_template_rejects_malformed_body() {
        let b = body(vec![JitOp::ConstNum(9), JitOp::Return]);
        let err = TemplateBackend::new().compile(&b, &ctx()).unwrap_err();
        assert!(matches!(err, CodegenError::MalformedBody(_)));
    }

    #[test]
    fn test_template_encodes_every_op_fixed_width() {
        let b = body(vec![
            JitOp::ConstNum(0),
            JitOp::Neg,
            JitOp::JumpIfFalse(1),
            JitOp::Return,
            JitOp::Return,
        ]);
        let compiled = TemplateBackend::new().compile(&b, &ctx()).unwrap();
        assert_eq!(compiled.code.len(), 4 + 5 * 5 + 2);
    }
}
