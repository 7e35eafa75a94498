mod rules;

use crate::heap::Heap;
use crate::object::{self, ObjectKind};
use crate::opcode::{Chunk, OpCode, OVERLOAD_SLOT_INIT};
use crate::scanner::{Scanner, Token, TokenKind};
use crate::value::{ObjectRef, Value};
use crate::vm::Globals;
use rules::Precedence;

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
const MAX_JUMP: u32 = 0xFF_FFFF;

#[derive(Debug, Clone)]
pub struct CompileError {
    pub line: u32,
    pub at: String,
    pub message: String,
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[line {}] Error at '{}': {}", self.line, self.at, self.message)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local<'src> {
    name: &'src str,
    depth: i32,
    is_captured: bool,
}

struct Upvalue {
    index: u8,
    is_local: bool,
}

/// One compilation context per function being compiled. The compiler keeps
/// a stack of these (via `enclosing`) so resolving a name that isn't local
/// can walk outward to find it as an upvalue.
struct FunctionScope<'src> {
    enclosing: Option<Box<FunctionScope<'src>>>,
    function: ObjectRef,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    upvalues: Vec<Upvalue>,
    scope_depth: i32,
}

impl<'src> FunctionScope<'src> {
    fn new(function: ObjectRef, kind: FunctionKind, enclosing: Option<Box<FunctionScope<'src>>>) -> Self {
        // Slot 0 is always reserved -- it's the stack position the call
        // protocol's `base` pointer names, holding the callee (or, after a
        // class/bound-method call rewrites it, the receiver). Methods name
        // it `self`; plain functions and the script never refer to it.
        let slot0_name = if matches!(kind, FunctionKind::Method | FunctionKind::Initializer) { "self" } else { "" };
        let locals = vec![Local { name: slot0_name, depth: 0, is_captured: false }];
        FunctionScope { enclosing, function, kind, locals, upvalues: Vec::new(), scope_depth: 0 }
    }
}

struct ClassCompileCtx {
    has_superclass: bool,
}

pub struct Compiler<'src, 'h> {
    scanner: Scanner<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    heap: &'h mut Heap,
    globals: &'h mut Globals,
    errors: Vec<CompileError>,
    panic_mode: bool,
    scope: Box<FunctionScope<'src>>,
    class_stack: Vec<ClassCompileCtx>,
}

impl<'src, 'h> Compiler<'src, 'h> {
    pub fn compile(source: &'src str, heap: &'h mut Heap, globals: &'h mut Globals) -> Result<ObjectRef, Vec<CompileError>> {
        let function = heap.alloc_function(None, 0, false, false);
        let scope = Box::new(FunctionScope::new(function, FunctionKind::Script, None));
        let mut compiler = Compiler {
            scanner: Scanner::new(source),
            previous: Token { kind: TokenKind::Eof, lexeme: "", line: 0 },
            current: Token { kind: TokenKind::Eof, lexeme: "", line: 0 },
            heap,
            globals,
            errors: Vec::new(),
            panic_mode: false,
            scope,
            class_stack: Vec::new(),
        };
        compiler.advance();
        while !compiler.check(TokenKind::Eof) {
            compiler.declaration();
        }
        compiler.consume(TokenKind::Eof, "Expect end of expression.");
        compiler.emit_return();
        if compiler.errors.is_empty() {
            Ok(compiler.scope.function)
        } else {
            Err(compiler.errors)
        }
    }

    // --- token stream plumbing ----------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.next_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let msg = self.current.lexeme.to_string();
            self.error_at_current(&msg);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn error_at_current(&mut self, message: &str) {
        let tok = self.current;
        self.error_at(tok, message);
    }

    fn error(&mut self, message: &str) {
        let tok = self.previous;
        self.error_at(tok, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let at = if token.kind == TokenKind::Eof { "end".to_string() } else { token.lexeme.to_string() };
        self.errors.push(CompileError { line: token.line, at, message: message.to_string() });
    }

    /// Panic-mode recovery: skip tokens until a likely statement boundary.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fn
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // --- emission -------------------------------------------------------

    fn current_chunk(&mut self) -> &mut Chunk {
        unsafe { &mut object::as_function_mut(self.scope.function).data.chunk }
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk().write_byte(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_ops(&mut self, a: OpCode, b: OpCode) {
        self.emit_op(a);
        self.emit_op(b);
    }

    fn emit_u24(&mut self, value: u32) {
        let line = self.previous.line;
        self.current_chunk().write_u24(value, line);
    }

    /// The implicit return every function body falls through to: `self`
    /// for initializers, `Nil` otherwise. Both are single-value returns, so
    /// they use the `TOPRET` shortcut rather than the RETSTART/RET pair
    /// multi-value returns need.
    fn emit_return(&mut self) {
        if self.scope.kind == FunctionKind::Initializer {
            self.emit_op(OpCode::GetLocal);
            self.emit_byte(0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::TopRet);
    }

    /// Adds `value` to the constant pool and emits the short or long
    /// `CONST` form depending on whether the index fits in one byte.
    fn emit_constant(&mut self, value: Value) {
        let index = self.current_chunk().add_constant(value);
        self.emit_indexed(OpCode::Const, OpCode::ConstL, index);
    }

    fn emit_indexed(&mut self, short: OpCode, long: OpCode, index: usize) {
        if index > 0xFF_FFFF {
            self.error("Too many constants in one chunk.");
            return;
        }
        if index <= 0xFF {
            self.emit_op(short);
            self.emit_byte(index as u8);
        } else {
            self.emit_op(long);
            self.emit_u24(index as u32);
        }
    }

    fn make_string_constant(&mut self, s: &str) -> usize {
        let ptr = self.heap.alloc_string(s.to_string());
        self.current_chunk().add_constant(Value::Object(ptr))
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        let at = self.current_chunk().code.len();
        self.emit_u24(0);
        at
    }

    fn patch_jump(&mut self, at: usize) {
        let offset = self.current_chunk().code.len() - (at + 3);
        if offset as u32 > MAX_JUMP {
            self.error("Too much code to jump over.");
            return;
        }
        let offset = offset as u32;
        self.current_chunk().patch_u24(at, offset);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.current_chunk().code.len() + 3 - loop_start;
        if offset as u32 > MAX_JUMP {
            self.error("Loop body too large.");
        }
        self.emit_u24(offset as u32);
    }

    // --- scopes, locals, upvalues ---------------------------------------

    fn begin_scope(&mut self) {
        self.scope.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.scope.scope_depth -= 1;
        let depth = self.scope.scope_depth;
        let mut to_pop = 0usize;
        while let Some(local) = self.scope.locals.last() {
            if local.depth <= depth {
                break;
            }
            if local.is_captured {
                if to_pop > 0 {
                    self.emit_op(OpCode::PopN);
                    self.emit_byte(to_pop as u8);
                    to_pop = 0;
                }
                self.emit_op(OpCode::CloseUpval);
            } else {
                to_pop += 1;
            }
            self.scope.locals.pop();
        }
        if to_pop == 1 {
            self.emit_op(OpCode::Pop);
        } else if to_pop > 1 {
            self.emit_op(OpCode::PopN);
            self.emit_byte(to_pop as u8);
        }
    }

    fn identifier_equal(a: &str, b: &str) -> bool {
        a == b
    }

    fn resolve_local(scope: &FunctionScope<'src>, name: &str) -> Option<usize> {
        for (i, local) in scope.locals.iter().enumerate().rev() {
            if Self::identifier_equal(local.name, name) {
                return Some(i);
            }
        }
        None
    }

    fn add_upvalue(scope: &mut FunctionScope<'src>, index: u8, is_local: bool) -> usize {
        for (i, up) in scope.upvalues.iter().enumerate() {
            if up.index == index && up.is_local == is_local {
                return i;
            }
        }
        scope.upvalues.push(Upvalue { index, is_local });
        scope.upvalues.len() - 1
    }

    /// Walks outward compile contexts looking for `name`; on success,
    /// threads an upvalue descriptor through every enclosing function
    /// between the defining scope and the current one.
    fn resolve_upvalue(scope: &mut FunctionScope<'src>, name: &str) -> Option<usize> {
        let enclosing = scope.enclosing.as_mut()?;
        if let Some(local_idx) = Self::resolve_local(enclosing, name) {
            enclosing.locals[local_idx].is_captured = true;
            return Some(Self::add_upvalue(scope, local_idx as u8, true));
        }
        if let Some(up_idx) = Self::resolve_upvalue(enclosing, name) {
            return Some(Self::add_upvalue(scope, up_idx as u8, false));
        }
        None
    }

    fn add_local(&mut self, name: &'src str) {
        if self.scope.locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.scope.locals.push(Local { name, depth: -1, is_captured: false });
    }

    fn mark_initialized(&mut self) {
        if self.scope.scope_depth == 0 {
            return;
        }
        if let Some(local) = self.scope.locals.last_mut() {
            local.depth = self.scope.scope_depth;
        }
    }

    fn declare_variable(&mut self, name: &'src str) {
        if self.scope.scope_depth == 0 {
            return;
        }
        for local in self.scope.locals.iter().rev() {
            if local.depth != -1 && local.depth < self.scope.scope_depth {
                break;
            }
            if Self::identifier_equal(local.name, name) {
                self.error("Already a variable with this name in this scope.");
            }
        }
        self.add_local(name);
    }

    // --- globals ----------------------------------------------------------

    /// Looks up (or assigns) the dense global id for `name`, following
    /// `spec.md` §4.2: ids are handed out on first declaration and shared
    /// across the whole compilation unit via the VM's global-id table.
    fn global_id(&mut self, name: &str) -> u32 {
        let name_ptr = self.heap.alloc_string(name.to_string());
        let key = Value::Object(name_ptr);
        if let Some(Value::Number(idx)) = self.globals.ids.get(&key) {
            return idx as u32;
        }
        let idx = self.globals.values.len() as u32;
        self.globals.values.push(crate::vm::GlobalSlot { value: Value::Empty, is_fixed: false, name: name_ptr });
        self.globals.ids.insert(key, Value::Number(idx as f64));
        idx
    }

    fn identifier_constant(&mut self, name: &str) -> usize {
        self.make_string_constant(name)
    }

    fn parse_variable(&mut self, message: &str) -> VariableTarget {
        self.consume(TokenKind::Identifier, message);
        let name = self.previous.lexeme;
        self.declare_variable(name);
        if self.scope.scope_depth > 0 {
            return VariableTarget::Local;
        }
        VariableTarget::Global(self.global_id(name))
    }

    fn define_variable(&mut self, target: VariableTarget, is_fixed: bool) {
        match target {
            VariableTarget::Local => self.mark_initialized(),
            VariableTarget::Global(idx) => {
                self.globals.values[idx as usize].is_fixed = is_fixed;
                self.emit_indexed(OpCode::DefineGlobal, OpCode::DefineGlobalL, idx as usize);
            }
        }
    }

    // --- statements ---------------------------------------------------

    fn declaration(&mut self) {
        if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else if self.matches(TokenKind::Fn) {
            self.fn_declaration();
        } else if self.matches(TokenKind::Class) {
            self.class_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self) {
        let target = self.parse_variable("Expect variable name.");
        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(target, false);
    }

    fn fn_declaration(&mut self) {
        let target = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(target, true);
    }

    fn function(&mut self, kind: FunctionKind) {
        let name_tok = self.previous.lexeme;
        let name_ptr = self.heap.alloc_string(name_tok.to_string());
        let fn_obj = self.heap.alloc_function(Some(name_ptr), 0, false, kind == FunctionKind::Initializer);
        let enclosing = std::mem::replace(
            &mut self.scope,
            Box::new(FunctionScope::new(fn_obj, kind, None)),
        );
        self.scope.enclosing = Some(enclosing);

        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        let mut arity: u8 = 0;
        let mut is_variadic = false;
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.matches(TokenKind::Dot) {
                    // `...` variadic marker: three dots consumed as Dot Dot Dot
                    self.consume(TokenKind::Dot, "Expect '...' for variadic parameter.");
                    self.consume(TokenKind::Dot, "Expect '...' for variadic parameter.");
                    is_variadic = true;
                    break;
                }
                arity += 1;
                if arity > 250 {
                    self.error_at_current("Can't have more than 250 parameters.");
                }
                let target = self.parse_variable("Expect parameter name.");
                self.define_variable(target, false);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        self.emit_return();
        {
            let f = unsafe { object::as_function_mut(self.scope.function) };
            f.data.arity = arity;
            f.data.is_variadic = is_variadic;
            f.data.upvalue_count = self.scope.upvalues.len() as u8;
        }

        let upvalues = std::mem::take(&mut self.scope.upvalues);
        let compiled_fn = self.scope.function;
        let enclosing = self.scope.enclosing.take().expect("function scope always has an enclosing scope");
        self.scope = enclosing;

        let const_idx = self.current_chunk().add_constant(Value::Object(compiled_fn)) as u32;
        self.emit_op(OpCode::Closure);
        self.emit_u24(const_idx);
        for up in &upvalues {
            self.emit_byte(if up.is_local { 1 } else { 0 });
            self.emit_byte(0); // flags (reserved; fixed-upvalue tracking not yet surfaced to syntax)
            let idx = up.index as u32;
            self.current_chunk().write_u24(idx, self.previous.line);
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name_tok = self.previous.lexeme;
        let name_const = self.identifier_constant(class_name_tok);
        let target = self.parse_variable_for_existing(class_name_tok);

        if name_const > 0xFF {
            self.error("Too many constants in one chunk.");
        }
        self.emit_op(OpCode::Class);
        self.emit_byte(name_const as u8);
        self.define_variable(target, true);

        let mut has_superclass = false;
        if self.matches(TokenKind::Colon) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            let super_name = self.previous.lexeme;
            if super_name == class_name_tok {
                self.error("A class can't inherit from itself.");
            }
            self.named_variable(super_name, false);

            self.begin_scope();
            self.add_local("super");
            self.mark_initialized();

            self.named_variable(class_name_tok, false);
            self.emit_op(OpCode::Inherit);
            has_superclass = true;
        }

        self.named_variable(class_name_tok, false);
        self.class_stack.push(ClassCompileCtx { has_superclass });

        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop); // pop the class value pushed for method-binding

        if has_superclass {
            self.end_scope();
        }
        self.class_stack.pop();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name = self.previous.lexeme;
        let name_const = self.identifier_constant(name);
        let kind = if name == "__init__" { FunctionKind::Initializer } else { FunctionKind::Method };
        self.function(kind);
        if name == "__init__" {
            self.emit_op(OpCode::Overload);
            self.emit_byte(OVERLOAD_SLOT_INIT);
        } else if name == "__display__" {
            self.emit_op(OpCode::OverloadDisplay);
        }
        self.emit_indexed(OpCode::Method, OpCode::MethodL, name_const);
    }

    /// Re-declares the class's own name as a variable target without
    /// re-consuming an identifier token (the name was already consumed by
    /// `class_declaration` to build the name constant).
    fn parse_variable_for_existing(&mut self, name: &'src str) -> VariableTarget {
        self.declare_variable(name);
        if self.scope.scope_depth > 0 {
            return VariableTarget::Local;
        }
        VariableTarget::Global(self.global_id(name))
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JmpIfFalsePop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jmp);
        self.patch_jump(then_jump);

        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().code.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JmpIfFalsePop);
        self.statement();
        self.emit_loop(loop_start);
        self.patch_jump(exit_jump);
    }

    /// `for k, v in iter { body }`: desugars to the `FOREACH_PREP`/`FOREACH`
    /// protocol described in spec.md §4.3.
    fn for_statement(&mut self) {
        self.begin_scope();

        let mut var_names: Vec<&'src str> = Vec::new();
        self.consume(TokenKind::Identifier, "Expect loop variable name.");
        var_names.push(self.previous.lexeme);
        while self.matches(TokenKind::Comma) {
            self.consume(TokenKind::Identifier, "Expect loop variable name.");
            var_names.push(self.previous.lexeme);
        }
        self.consume(TokenKind::Identifier, "Expect 'in' after loop variables.");

        // the iterator expression is evaluated once and kept in a synthetic local
        self.expression();
        self.add_local("@iter");
        self.mark_initialized();

        for name in &var_names {
            self.emit_op(OpCode::Nil);
            self.add_local(name);
            self.mark_initialized();
        }

        let vars = var_names.len() as u8;
        let loop_start = self.current_chunk().code.len();
        self.emit_op(OpCode::ForeachPrep);
        self.emit_byte(vars);
        let exit_jump = self.emit_jump(OpCode::Jmp);

        self.emit_op(OpCode::Foreach);
        self.emit_byte(vars);

        self.consume(TokenKind::LeftBrace, "Expect '{' before for-loop body.");
        self.begin_scope();
        self.block();
        self.end_scope();

        self.emit_loop(loop_start);
        self.patch_jump(exit_jump);

        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.scope.kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }
        if self.matches(TokenKind::Semicolon) {
            self.emit_return();
            return;
        }
        if self.scope.kind == FunctionKind::Initializer {
            self.error("Can't return a value from an initializer.");
        }
        // RETSTART must sit below every returned value so `sp - marker`
        // counts the whole list, so it's emitted before parsing any of them.
        self.emit_op(OpCode::RetStart);
        loop {
            self.expression();
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
        self.emit_op(OpCode::Ret);
    }

    // --- expressions ------------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !rules::prefix(self, self.previous.kind, can_assign) {
            self.error("Expect expression.");
            return;
        }
        while precedence <= rules::infix_precedence(self.current.kind) {
            self.advance();
            rules::infix(self, self.previous.kind, can_assign);
        }
        if can_assign && self.matches(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn number(&mut self) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self) {
        let raw = self.previous.lexeme;
        let contents = &raw[1..raw.len() - 1];
        let ptr = self.heap.alloc_string(contents.to_string());
        self.emit_constant(Value::Object(ptr));
    }

    fn literal(&mut self, kind: TokenKind) {
        match kind {
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            _ => unreachable!(),
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self, kind: TokenKind) {
        self.parse_precedence(Precedence::Unary);
        match kind {
            TokenKind::Minus => self.emit_op(OpCode::Neg),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self, kind: TokenKind) {
        let prec = rules::infix_precedence(kind);
        self.parse_precedence(prec.next());
        match kind {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Sub),
            TokenKind::Star => self.emit_op(OpCode::Mul),
            TokenKind::Slash => self.emit_op(OpCode::Div),
            TokenKind::Percent => self.emit_op(OpCode::Mod),
            TokenKind::Caret => self.emit_op(OpCode::Pow),
            TokenKind::BangEqual => self.emit_op(OpCode::NotEqual),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => self.emit_op(OpCode::GreaterEqual),
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => self.emit_op(OpCode::LessEqual),
            _ => unreachable!(),
        }
    }

    /// `cond ? then : else`; `cond` is already on the stack (parsed by the
    /// caller before dispatching to this infix rule).
    fn ternary(&mut self) {
        let else_jump = self.emit_jump(OpCode::JmpIfFalsePop);
        self.parse_precedence(Precedence::Assignment);
        self.consume(TokenKind::Colon, "Expect ':' in ternary expression.");
        let end_jump = self.emit_jump(OpCode::Jmp);
        self.patch_jump(else_jump);
        self.parse_precedence(Precedence::Ternary);
        self.patch_jump(end_jump);
    }

    fn and(&mut self) {
        let end_jump = self.emit_jump(OpCode::JmpIfFalseAndPop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self) {
        let else_jump = self.emit_jump(OpCode::JmpIfFalseOrPop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(else_jump);
    }

    fn call(&mut self) {
        self.emit_op(OpCode::CallStart);
        self.argument_list(TokenKind::RightParen);
        self.emit_op(OpCode::Call);
        // Calls compiled as subexpressions want exactly one result; a
        // caller that wants every actual return uses `retcnt = 0` (see
        // spec.md §4.3), which this compiler never needs to emit since
        // multi-return only ever flows through a `return` statement.
        self.emit_u24(1);
    }

    fn argument_list(&mut self, terminator: TokenKind) -> usize {
        let mut count = 0usize;
        if !self.check(terminator) {
            loop {
                self.expression();
                count += 1;
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(terminator, "Expect ')' after arguments.");
        count
    }

    fn index(&mut self, can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightBracket, "Expect ']' after index.");
        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_op(OpCode::SetIndex);
        } else if self.matches(TokenKind::LeftParen) {
            self.emit_op(OpCode::CallStart);
            self.argument_list(TokenKind::RightParen);
            self.emit_op(OpCode::InvokeIndex);
            self.emit_u24(1);
        } else {
            self.emit_op(OpCode::Index);
        }
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.previous.lexeme;
        let name_const = self.identifier_constant(name);

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_indexed(OpCode::SetProperty, OpCode::SetPropertyL, name_const);
        } else if self.matches(TokenKind::LeftParen) {
            self.emit_op(OpCode::CallStart);
            self.argument_list(TokenKind::RightParen);
            self.emit_op(OpCode::Invoke);
            self.emit_u24(name_const as u32);
            self.emit_u24(1);
        } else {
            self.emit_indexed(OpCode::GetProperty, OpCode::GetPropertyL, name_const);
        }
    }

    fn named_variable(&mut self, name: &'src str, can_assign: bool) {
        if let Some(local_idx) = Self::resolve_local(&self.scope, name) {
            self.resolved_access(can_assign, OpCode::GetLocal, OpCode::GetLocalL, OpCode::SetLocal, OpCode::SetLocalL, local_idx);
        } else if let Some(up_idx) = Self::resolve_upvalue(&mut self.scope, name) {
            if can_assign && self.matches(TokenKind::Equal) {
                self.expression();
                self.emit_op(OpCode::SetUpvalue);
                self.emit_byte(up_idx as u8);
            } else {
                self.emit_op(OpCode::GetUpvalue);
                self.emit_byte(up_idx as u8);
            }
        } else {
            let idx = self.global_id(name);
            if can_assign && self.matches(TokenKind::Equal) {
                self.expression();
                self.emit_indexed(OpCode::SetGlobal, OpCode::SetGlobalL, idx as usize);
            } else {
                self.emit_indexed(OpCode::GetGlobal, OpCode::GetGlobalL, idx as usize);
            }
        }
    }

    fn resolved_access(&mut self, can_assign: bool, get_s: OpCode, get_l: OpCode, set_s: OpCode, set_l: OpCode, idx: usize) {
        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_indexed(set_s, set_l, idx);
        } else {
            self.emit_indexed(get_s, get_l, idx);
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.lexeme;
        self.named_variable(name, can_assign);
    }

    fn self_expr(&mut self) {
        if self.class_stack.is_empty() {
            self.error("Can't use 'self' outside of a class method.");
            return;
        }
        self.named_variable("self", false);
    }

    fn super_expr(&mut self) {
        if self.class_stack.is_empty() {
            self.error("Can't use 'super' outside of a class.");
        } else if !self.class_stack.last().unwrap().has_superclass {
            self.error("Can't use 'super' in a class with no superclass.");
        }
        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.previous.lexeme;
        let name_const = self.identifier_constant(name);

        self.named_variable("self", false);
        if self.matches(TokenKind::LeftParen) {
            self.emit_op(OpCode::CallStart);
            self.argument_list(TokenKind::RightParen);
            self.named_variable("super", false);
            self.emit_op(OpCode::InvokeSuper);
            self.emit_u24(name_const as u32);
            self.emit_u24(1);
        } else {
            self.named_variable("super", false);
            self.emit_indexed(OpCode::GetSuper, OpCode::GetSuperL, name_const);
        }
    }
}

enum VariableTarget {
    Local,
    Global(u32),
}
