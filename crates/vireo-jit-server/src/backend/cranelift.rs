//! Cranelift code generation backend
//!
//! Lowers the straight-line arithmetic subset of the portable bytecode to
//! real native code. Bodies using control flow or property caches fall
//! back to the template backend (the service reports `UnsupportedOp` and
//! the client keeps interpreting).

use std::sync::Arc;

use cranelift_codegen::control::ControlPlane;
use cranelift_codegen::ir::{types, AbiParam, InstBuilder, MemFlags, UserFuncName, Value};
use cranelift_codegen::isa::{CallConv, TargetIsa};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};

use super::traits::{CodegenBackend, CodegenError, CompileContext, CompiledCode};
use vireo_jit_proto::bytecode::{JitBody, JitOp};

/// Cranelift-based backend targeting the host machine
pub struct CraneliftBackend {
    isa: Arc<dyn TargetIsa>,
}

impl CraneliftBackend {
    /// Create a backend for the host ISA
    pub fn host() -> Result<Self, CodegenError> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("opt_level", "speed")
            .map_err(|e| CodegenError::BackendError(format!("Failed to set opt_level: {}", e)))?;
        flag_builder
            .set("is_pic", "true")
            .map_err(|e| CodegenError::BackendError(format!("Failed to set is_pic: {}", e)))?;
        let flags = settings::Flags::new(flag_builder);

        let isa = cranelift_native::builder()
            .map_err(|e| {
                CodegenError::BackendError(format!("Failed to create native ISA builder: {}", e))
            })?
            .finish(flags)
            .map_err(|e| CodegenError::BackendError(format!("Failed to finish ISA: {}", e)))?;

        Ok(Self { isa })
    }

    fn signature(&self) -> cranelift_codegen::ir::Signature {
        // fn(args: *const f64, argc: i64) -> f64
        let call_conv = self.isa.default_call_conv();
        let mut sig = cranelift_codegen::ir::Signature::new(call_conv);
        let _ = CallConv::Fast; // host call conv chosen above
        sig.params.push(AbiParam::new(types::I64));
        sig.params.push(AbiParam::new(types::I64));
        sig.returns.push(AbiParam::new(types::F64));
        sig
    }
}

fn lower(
    builder: &mut FunctionBuilder<'_>,
    body: &JitBody,
    ctx: &CompileContext<'_>,
) -> Result<(), CodegenError> {
    let entry = builder.create_block();
    builder.append_block_params_for_function_params(entry);
    builder.switch_to_block(entry);
    builder.seal_block(entry);

    let args_ptr = builder.block_params(entry)[0];
    let mut stack: Vec<Value> = Vec::new();
    let mut returned = false;

    let mut pop = |stack: &mut Vec<Value>| -> Result<Value, CodegenError> {
        stack
            .pop()
            .ok_or_else(|| CodegenError::BackendError("operand stack underflow".to_string()))
    };

    for op in &body.ops {
        match *op {
            JitOp::ConstNum(i) => {
                let v = builder.ins().f64const(body.consts[i as usize]);
                stack.push(v);
            }
            JitOp::ConstInt(n) => {
                let v = builder.ins().f64const(n as f64);
                stack.push(v);
            }
            JitOp::PageConst(i) => {
                let v = builder.ins().f64const(ctx.page_constants[i as usize]);
                stack.push(v);
            }
            JitOp::LoadArg(n) => {
                let v = builder.ins().load(
                    types::F64,
                    MemFlags::trusted(),
                    args_ptr,
                    (n as i32) * 8,
                );
                stack.push(v);
            }
            JitOp::LoadGlobalThis => {
                let v = builder.ins().f64const(ctx.global_this_addr as f64);
                stack.push(v);
            }
            JitOp::Add | JitOp::Sub | JitOp::Mul | JitOp::Div => {
                let rhs = pop(&mut stack)?;
                let lhs = pop(&mut stack)?;
                let v = match *op {
                    JitOp::Add => builder.ins().fadd(lhs, rhs),
                    JitOp::Sub => builder.ins().fsub(lhs, rhs),
                    JitOp::Mul => builder.ins().fmul(lhs, rhs),
                    _ => builder.ins().fdiv(lhs, rhs),
                };
                stack.push(v);
            }
            JitOp::Neg => {
                let v = pop(&mut stack)?;
                stack.push(builder.ins().fneg(v));
            }
            JitOp::Eq | JitOp::Lt | JitOp::Le => {
                use cranelift_codegen::ir::condcodes::FloatCC;
                let rhs = pop(&mut stack)?;
                let lhs = pop(&mut stack)?;
                let cc = match *op {
                    JitOp::Eq => FloatCC::Equal,
                    JitOp::Lt => FloatCC::LessThan,
                    _ => FloatCC::LessThanOrEqual,
                };
                let flag = builder.ins().fcmp(cc, lhs, rhs);
                let one = builder.ins().f64const(1.0);
                let zero = builder.ins().f64const(0.0);
                stack.push(builder.ins().select(flag, one, zero));
            }
            JitOp::Return => {
                let v = pop(&mut stack)?;
                builder.ins().return_(&[v]);
                returned = true;
                break;
            }
            JitOp::Jump(_) | JitOp::JumpIfFalse(_) => {
                return Err(CodegenError::UnsupportedOp("control flow".to_string()));
            }
            JitOp::LoadProperty(_) | JitOp::StoreProperty(_) => {
                return Err(CodegenError::UnsupportedOp("property cache".to_string()));
            }
        }
    }

    if !returned {
        let zero = builder.ins().f64const(0.0);
        builder.ins().return_(&[zero]);
    }
    Ok(())
}

impl CodegenBackend for CraneliftBackend {
    fn name(&self) -> &str {
        "cranelift"
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

        let mut codegen_ctx = Context::new();
        let mut fb_ctx = FunctionBuilderContext::new();
        codegen_ctx.func.signature = self.signature();
        codegen_ctx.func.name = UserFuncName::user(0, body.body_id as u32);

        {
            let mut builder = FunctionBuilder::new(&mut codegen_ctx.func, &mut fb_ctx);
            lower(&mut builder, body, ctx)?;
            builder.finalize();
        }

        let mut ctrl_plane = ControlPlane::default();
        let code = codegen_ctx
            .compile(&*self.isa, &mut ctrl_plane)
            .map_err(|e| {
                CodegenError::BackendError(format!("Cranelift compilation failed: {:?}", e))
            })?;

        Ok(CompiledCode {
            code: code.code_buffer().to_vec(),
            entry_offset: 0,
            prolog_size: 0,
            frame_size: 0,
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

    #[test]
    fn test_cranelift_compiles_arithmetic() {
        let body = JitBody {
            body_id: 1,
            name: "add".to_string(),
            arg_count: 2,
            consts: vec![],
            ops: vec![JitOp::LoadArg(0), JitOp::LoadArg(1), JitOp::Add, JitOp::Return],
        };
        let backend = CraneliftBackend::host().unwrap();
        let compiled = backend.compile(&body, &ctx()).unwrap();
        assert!(compiled.code.len() > 4);
    }

    #[test]
    fn test_cranelift_rejects_control_flow() {
        let body = JitBody {
            body_id: 1,
            name: "loopy".to_string(),
            arg_count: 0,
            consts: vec![1.0],
            ops: vec![JitOp::ConstNum(0), JitOp::JumpIfFalse(-2), JitOp::Return],
        };
        let backend = CraneliftBackend::host().unwrap();
        let err = backend.compile(&body, &ctx()).unwrap_err();
        assert!(matches!(err, CodegenError::UnsupportedOp(_)));
    }
}
