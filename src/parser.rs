//! A parser for the printed IR, useful mostly for testing.

use crate::{context::Context, error::IrError};

// -------------------------------------------------------------------------------------------------
/// Parse a string produced by [`crate::printer::to_string`] into a new
/// [`Context`].
pub fn parse(input: &str) -> Result<Context, IrError> {
    let irmod = ir_builder::parser::ir_module(input).map_err(|err| {
        let found = if input.len() - err.location.offset <= 20 {
            &input[err.location.offset..]
        } else {
            &input[err.location.offset..][..20]
        };
        IrError::ParseFailure(err.to_string(), found.into())
    })?;
    ir_builder::build_context(irmod)
}

// -------------------------------------------------------------------------------------------------

mod ir_builder {
    use rustc_hash::FxHashMap;

    use crate::{
        block::Block,
        constant::Constant,
        context::Context,
        error::IrError,
        function::Function,
        global_var::GlobalVar,
        instruction::{BinaryOpKind, InstOp, Instruction, Predicate},
        irtype::Type,
        metadata::DebugLoc,
        module::Module,
        value::{Value, ValueDatum},
    };

    peg::parser! {
        pub(in crate::parser) grammar parser() for str {
            pub(in crate::parser) rule ir_module() -> IrAstModule
                = _ "module" _ "{" _ globals:global_decl()* fn_decls:fn_decl()* "}" _ eoi() {
                    IrAstModule { globals, fn_decls }
                }

            rule global_decl() -> IrAstGlobal
                = "global" _ is_const:("const" _)? "@" name:gid() body:global_body() {
                    let (ty, init) = body;
                    IrAstGlobal {
                        name,
                        is_constant: is_const.is_some(),
                        ty,
                        init,
                    }
                }

            rule global_body() -> (Option<Type>, Option<Constant>)
                = ":" _ ty:ast_ty() { (Some(ty), None) }
                / "=" _ init:const_lit() { (None, Some(init)) }

            rule fn_decl() -> IrAstFnDecl
                = "decl" _ "fn" _ name:id() "(" _ params:decl_params() ")" _ "->" _ ret_type:ast_ty() {
                    let (arg_tys, is_variadic) = params;
                    IrAstFnDecl::Decl {
                        name,
                        arg_tys,
                        is_variadic,
                        ret_type,
                    }
                }
                / "fn" _ name:id() "(" _ args:(fn_arg() ** comma()) ")" _ "->" _ ret_type:ast_ty()
                        "{" _ blocks:block_decl()* "}" _ {
                    IrAstFnDecl::Defn {
                        name,
                        args,
                        ret_type,
                        blocks,
                    }
                }

            rule decl_param() -> Option<Type>
                = "..." _ { None }
                / ty:ast_ty() { Some(ty) }

            rule decl_params() -> (Vec<Type>, bool)
                = items:(decl_param() ** comma()) {
                    let is_variadic = items.last().map_or(false, |item| item.is_none());
                    (items.into_iter().flatten().collect(), is_variadic)
                }

            rule fn_arg() -> (String, Type)
                = name:id() ":" _ ty:ast_ty() {
                    (name, ty)
                }

            rule block_decl() -> IrAstBlock
                = label:id() "(" _ ")" _ ":" _ instructions:instr_decl()* {
                    IrAstBlock {
                        label,
                        instructions,
                    }
                }

            rule instr_decl() -> IrAstInstruction
                = value_name:value_assign()? op:operation() loc:debug_loc()? {
                    IrAstInstruction {
                        value_name,
                        op,
                        loc,
                    }
                }

            rule value_assign() -> String
                = name:id() "=" _ {
                    name
                }

            rule debug_loc() -> (String, u32, u32)
                = "," _ "!loc" _ "(" _ file:string_lit() comma() line:decimal() comma() col:decimal() ")" _ {
                    (file, line as u32, col as u32)
                }

            rule operation() -> IrAstOperation
                = "call" _ name:id() "(" _ args:(operand() ** comma()) ")" _ {
                    IrAstOperation::Call(name, args)
                }
                / "phi" _ "(" _ pairs:(phi_pair() ** comma()) ")" _ {
                    IrAstOperation::Phi(pairs)
                }
                / "load" _ ptr:operand() {
                    IrAstOperation::Load(ptr)
                }
                / "store" _ stored:operand() "to" _ dst:operand() {
                    IrAstOperation::Store { dst, stored }
                }
                / "gep" _ base:operand() "[" _ indices:(operand() ** comma()) "]" _ {
                    IrAstOperation::Gep(base, indices)
                }
                / "const_gep" _ "@" name:gid() {
                    IrAstOperation::ConstGep(name)
                }
                / c:const_lit() {
                    IrAstOperation::Const(c)
                }
                / "cmp" _ pred:predicate() lhs:operand() comma() rhs:operand() {
                    IrAstOperation::Cmp(pred, lhs, rhs)
                }
                / op:binary_op_kind() arg1:operand() comma() arg2:operand() {
                    IrAstOperation::BinaryOp(op, arg1, arg2)
                }
                / "cbr" _ cond:operand() comma() true_label:id() comma() false_label:id() {
                    IrAstOperation::Cbr(cond, true_label, false_label)
                }
                / "switch" _ value:operand() comma() "default" _ default_label:id() comma()
                        "[" _ cases:(switch_case() ** comma()) "]" _ {
                    IrAstOperation::Switch(value, default_label, cases)
                }
                / "br" _ label:id() {
                    IrAstOperation::Br(label)
                }
                / "ret" _ "(" _ ")" _ {
                    IrAstOperation::Ret(None)
                }
                / "ret" _ ast_ty() value:operand() {
                    IrAstOperation::Ret(Some(value))
                }
                / "nop" _ {
                    IrAstOperation::Nop
                }

            rule phi_pair() -> (String, IrAstOperand)
                = label:id() ":" _ value:operand() {
                    (label, value)
                }

            rule switch_case() -> (u64, String)
                = n:decimal() ":" _ label:id() {
                    (n, label)
                }

            rule const_lit() -> Constant
                = "const" _ "(" _ ")" _ {
                    Constant::new_unit()
                }
                / "const" _ "bool" _ b:bool_lit() {
                    Constant::new_bool(b)
                }
                / "const" _ "string" _ s:string_lit() {
                    Constant::new_string(s)
                }
                / "const" _ "u" nbits:$(['0'..='9']+) _ n:decimal() {
                    Constant::new_uint(nbits.parse().unwrap(), n)
                }

            rule bool_lit() -> bool
                = "true" _ { true }
                / "false" _ { false }

            rule operand() -> IrAstOperand
                = "@" name:gid() { IrAstOperand::Global(name) }
                / name:id() { IrAstOperand::Var(name) }

            rule predicate() -> Predicate
                = "eq" _ { Predicate::Equal }
                / "ne" _ { Predicate::NotEqual }
                / "lt" _ { Predicate::LessThan }
                / "gt" _ { Predicate::GreaterThan }

            rule binary_op_kind() -> BinaryOpKind
                = "add" _ { BinaryOpKind::Add }
                / "sub" _ { BinaryOpKind::Sub }
                / "mul" _ { BinaryOpKind::Mul }
                / "div" _ { BinaryOpKind::Div }

            rule ast_ty() -> Type
                = ("unit" / "()") _ { Type::Unit }
                / "bool" _ { Type::Bool }
                / "ptr" _ { Type::Ptr }
                / "string" _ "<" _ n:decimal() ">" _ { Type::String(n) }
                / "u" nbits:$(['0'..='9']+) _ { Type::Uint(nbits.parse().unwrap()) }

            // Dots are allowed past the first character for intrinsic names
            // such as `llvm.memcpy.p0i8.p0i8.i64`.
            rule id() -> String
                = ident:$(['a'..='z' | 'A'..='Z' | '_']['a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '.']*) _ {
                    ident.to_owned()
                }

            rule gid() -> String
                = ident:$(['a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '.' | '-']+) _ {
                    ident.to_owned()
                }

            rule string_lit() -> String
                = "\"" s:$((!['"'] [_])*) "\"" _ {
                    s.to_owned()
                }

            rule decimal() -> u64
                = ds:$(['0'..='9']+) _ {
                    ds.parse().unwrap()
                }

            rule comma()
                = "," _

            rule _()
                = quiet!{ ([' ' | '\t' | '\r' | '\n'] / ("//" (!['\n'] [_])*))* }

            rule eoi()
                = ![_] / expected!("end of input")
        }
    }

    // ---------------------------------------------------------------------------------------------

    #[derive(Debug)]
    pub(in crate::parser) struct IrAstModule {
        globals: Vec<IrAstGlobal>,
        fn_decls: Vec<IrAstFnDecl>,
    }

    #[derive(Debug)]
    struct IrAstGlobal {
        name: String,
        is_constant: bool,
        ty: Option<Type>,
        init: Option<Constant>,
    }

    #[derive(Debug)]
    enum IrAstFnDecl {
        Decl {
            name: String,
            arg_tys: Vec<Type>,
            is_variadic: bool,
            ret_type: Type,
        },
        Defn {
            name: String,
            args: Vec<(String, Type)>,
            ret_type: Type,
            blocks: Vec<IrAstBlock>,
        },
    }

    #[derive(Debug)]
    struct IrAstBlock {
        label: String,
        instructions: Vec<IrAstInstruction>,
    }

    #[derive(Debug)]
    struct IrAstInstruction {
        value_name: Option<String>,
        op: IrAstOperation,
        loc: Option<(String, u32, u32)>,
    }

    #[derive(Debug)]
    enum IrAstOperand {
        Var(String),
        Global(String),
    }

    #[derive(Debug)]
    enum IrAstOperation {
        BinaryOp(BinaryOpKind, IrAstOperand, IrAstOperand),
        Br(String),
        Call(String, Vec<IrAstOperand>),
        Cbr(IrAstOperand, String, String),
        Cmp(Predicate, IrAstOperand, IrAstOperand),
        Const(Constant),
        ConstGep(String),
        Gep(IrAstOperand, Vec<IrAstOperand>),
        Load(IrAstOperand),
        Nop,
        Phi(Vec<(String, IrAstOperand)>),
        Ret(Option<IrAstOperand>),
        Store {
            dst: IrAstOperand,
            stored: IrAstOperand,
        },
        Switch(IrAstOperand, String, Vec<(u64, String)>),
    }

    // ---------------------------------------------------------------------------------------------

    pub(in crate::parser) fn build_context(ir_ast_mod: IrAstModule) -> Result<Context, IrError> {
        let mut context = Context::default();
        let module = Module::new(&mut context, "module");

        for global in &ir_ast_mod.globals {
            let ty = global
                .ty
                .or_else(|| global.init.as_ref().map(|init| init.ty))
                .unwrap_or(Type::Ptr);
            GlobalVar::new(
                &mut context,
                module,
                global.name.clone(),
                ty,
                global.init.clone(),
                global.is_constant,
            );
        }

        // Create every function up front so calls resolve regardless of
        // declaration order.
        let mut fn_map = FxHashMap::<String, Function>::default();
        for decl in &ir_ast_mod.fn_decls {
            let func = match decl {
                IrAstFnDecl::Decl {
                    name,
                    arg_tys,
                    is_variadic,
                    ret_type,
                } => Function::new(
                    &mut context,
                    module,
                    name.clone(),
                    arg_tys
                        .iter()
                        .enumerate()
                        .map(|(idx, ty)| (format!("arg{idx}"), *ty))
                        .collect(),
                    *ret_type,
                    *is_variadic,
                ),
                IrAstFnDecl::Defn {
                    name,
                    args,
                    ret_type,
                    ..
                } => Function::new(
                    &mut context,
                    module,
                    name.clone(),
                    args.clone(),
                    *ret_type,
                    false,
                ),
            };
            let name = match decl {
                IrAstFnDecl::Decl { name, .. } | IrAstFnDecl::Defn { name, .. } => name.clone(),
            };
            fn_map.insert(name, func);
        }

        for decl in &ir_ast_mod.fn_decls {
            if let IrAstFnDecl::Defn { name, blocks, .. } = decl {
                build_fn_body(&mut context, module, &fn_map, fn_map[name], blocks)?;
            }
        }

        Ok(context)
    }

    fn resolve_operand(
        context: &Context,
        module: Module,
        val_map: &FxHashMap<String, Value>,
        operand: &IrAstOperand,
    ) -> Result<Value, IrError> {
        match operand {
            IrAstOperand::Var(name) => val_map
                .get(name)
                .copied()
                .ok_or_else(|| IrError::ValueNotFound(name.clone())),
            IrAstOperand::Global(name) => module
                .get_global(context, name)
                .ok_or_else(|| IrError::ValueNotFound(format!("@{name}"))),
        }
    }

    fn build_fn_body(
        context: &mut Context,
        module: Module,
        fn_map: &FxHashMap<String, Function>,
        func: Function,
        blocks: &[IrAstBlock],
    ) -> Result<(), IrError> {
        let mut val_map = FxHashMap::<String, Value>::default();
        for (name, arg_val) in func.args_iter(context) {
            val_map.insert(name.clone(), *arg_val);
        }
        let val_map = &mut val_map;

        let mut block_map = FxHashMap::<String, Block>::default();
        for block in blocks {
            let new_block = func.create_block(context, Some(block.label.clone()));
            block_map.insert(block.label.clone(), new_block);
        }
        let lookup_block = |label: &String| {
            block_map
                .get(label)
                .copied()
                .ok_or_else(|| IrError::MissingBlock(label.clone()))
        };

        // Values may be referenced before they are defined (loop phis), so
        // first reserve a placeholder per instruction, then realize the
        // operations in a second pass.
        let mut placeholders = Vec::new();
        for block in blocks {
            let block_handle = block_map[&block.label];
            for ins in &block.instructions {
                let ins_val = block_handle.append(context, InstOp::Nop);
                if let Some((file, line, col)) = &ins.loc {
                    ins_val.set_debug_loc(context, DebugLoc::new(file, *line, *col));
                }
                if let Some(name) = &ins.value_name {
                    val_map.insert(name.clone(), ins_val);
                }
                placeholders.push((block_handle, ins_val, ins));
            }
        }

        for (block, ins_val, ins) in placeholders {
            let opd = |context: &Context, operand: &IrAstOperand| {
                resolve_operand(context, module, val_map, operand)
            };
            let datum = match &ins.op {
                IrAstOperation::BinaryOp(op, arg1, arg2) => {
                    ValueDatum::Instruction(Instruction {
                        parent: block,
                        op: InstOp::BinaryOp {
                            op: *op,
                            arg1: opd(context, arg1)?,
                            arg2: opd(context, arg2)?,
                        },
                    })
                }
                IrAstOperation::Br(label) => ValueDatum::Instruction(Instruction {
                    parent: block,
                    op: InstOp::Branch(lookup_block(label)?),
                }),
                IrAstOperation::Call(callee, args) => {
                    let callee = fn_map
                        .get(callee)
                        .copied()
                        .ok_or_else(|| IrError::MissingFunction(callee.clone()))?;
                    let args = args
                        .iter()
                        .map(|arg| opd(context, arg))
                        .collect::<Result<Vec<_>, _>>()?;
                    ValueDatum::Instruction(Instruction {
                        parent: block,
                        op: InstOp::Call(callee, args),
                    })
                }
                IrAstOperation::Cbr(cond, true_label, false_label) => {
                    ValueDatum::Instruction(Instruction {
                        parent: block,
                        op: InstOp::ConditionalBranch {
                            cond_value: opd(context, cond)?,
                            true_block: lookup_block(true_label)?,
                            false_block: lookup_block(false_label)?,
                        },
                    })
                }
                IrAstOperation::Cmp(pred, lhs, rhs) => ValueDatum::Instruction(Instruction {
                    parent: block,
                    op: InstOp::Cmp(*pred, opd(context, lhs)?, opd(context, rhs)?),
                }),
                IrAstOperation::Const(constant) => ValueDatum::Constant(constant.clone()),
                IrAstOperation::ConstGep(gname) => {
                    let base = module
                        .get_global(context, gname)
                        .ok_or_else(|| IrError::ValueNotFound(format!("@{gname}")))?;
                    ValueDatum::Constant(Constant::new_gep(base))
                }
                IrAstOperation::Gep(base, indices) => {
                    let base = opd(context, base)?;
                    let indices = indices
                        .iter()
                        .map(|idx| opd(context, idx))
                        .collect::<Result<Vec<_>, _>>()?;
                    ValueDatum::Instruction(Instruction {
                        parent: block,
                        op: InstOp::GetElemPtr { base, indices },
                    })
                }
                IrAstOperation::Load(ptr) => ValueDatum::Instruction(Instruction {
                    parent: block,
                    op: InstOp::Load(opd(context, ptr)?),
                }),
                IrAstOperation::Nop => ValueDatum::Instruction(Instruction {
                    parent: block,
                    op: InstOp::Nop,
                }),
                IrAstOperation::Phi(pairs) => {
                    let pairs = pairs
                        .iter()
                        .map(|(label, value)| {
                            Ok((lookup_block(label)?, opd(context, value)?))
                        })
                        .collect::<Result<Vec<_>, IrError>>()?;
                    ValueDatum::Instruction(Instruction {
                        parent: block,
                        op: InstOp::Phi(pairs),
                    })
                }
                IrAstOperation::Ret(None) => ValueDatum::Instruction(Instruction {
                    parent: block,
                    op: InstOp::Ret(None),
                }),
                IrAstOperation::Ret(Some(value)) => ValueDatum::Instruction(Instruction {
                    parent: block,
                    op: InstOp::Ret(Some(opd(context, value)?)),
                }),
                IrAstOperation::Store { dst, stored } => ValueDatum::Instruction(Instruction {
                    parent: block,
                    op: InstOp::Store {
                        dst_val: opd(context, dst)?,
                        stored_val: opd(context, stored)?,
                    },
                }),
                IrAstOperation::Switch(value, default_label, cases) => {
                    let cases = cases
                        .iter()
                        .map(|(n, label)| Ok((*n, lookup_block(label)?)))
                        .collect::<Result<Vec<_>, IrError>>()?;
                    ValueDatum::Instruction(Instruction {
                        parent: block,
                        op: InstOp::Switch {
                            value: opd(context, value)?,
                            default_block: lookup_block(default_label)?,
                            cases,
                        },
                    })
                }
            };
            if let ValueDatum::Instruction(instruction) = &datum {
                for succ in instruction.op.get_successors() {
                    succ.add_pred(context, &block);
                }
            }
            ins_val.replace(context, datum);
        }

        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use crate::instruction::InstOp;

        #[test]
        fn parse_and_print_a_module() {
            let input = r#"
                module {
                    global @buf: ptr
                    global const @.str0 = const string "config.ini"
                    decl fn fopen(ptr, ptr) -> ptr
                    decl fn printf(ptr, ...) -> u64
                    fn main(argc: u64) -> u64 {
                        entry():
                        v0 = const_gep @.str0
                        v1 = call fopen(v0, v0)
                        store v1 to @buf
                        v2 = const u64 0
                        v3 = cmp eq argc, v2
                        cbr v3, lhs, rhs

                        lhs():
                        br exit

                        rhs():
                        br exit

                        exit():
                        v4 = phi(lhs: v1, rhs: v2)
                        ret u64 v4
                    }
                }
            "#;
            let context = crate::parser::parse(input).unwrap();
            let module = context.module_iter().next().unwrap();
            let main = module.get_function(&context, "main").unwrap();
            assert!(!main.is_declaration(&context));
            assert_eq!(main.num_blocks(&context), 4);

            let printf = module.get_function(&context, "printf").unwrap();
            assert!(printf.is_declaration(&context));
            assert!(printf.is_variadic(&context));

            // The exit block has two predecessors and a phi over both arms.
            let exit = main
                .block_iter(&context)
                .find(|block| block.get_label(&context) == "exit")
                .unwrap();
            assert_eq!(exit.num_predecessors(&context), 2);
            let phi_val = exit.instruction_iter(&context).next().unwrap();
            assert!(matches!(
                phi_val.get_instruction(&context).map(|ins| &ins.op),
                Some(InstOp::Phi(pairs)) if pairs.len() == 2
            ));

            // Printing and re-parsing preserves the shape.
            let printed = crate::printer::to_string(&context);
            let reparsed = crate::parser::parse(&printed).unwrap();
            let module2 = reparsed.module_iter().next().unwrap();
            let main2 = module2.get_function(&reparsed, "main").unwrap();
            assert_eq!(main2.num_blocks(&reparsed), 4);
        }
    }
}
