use super::chunk::{Chunk, Instruction};
use super::debug;
use super::operators::{self, Precedence};
use super::reporter::{Phase, Report, Reporter};
use super::token::{Token, TokenType};
use super::tokenizer::Tokenizer;
use super::value::{Interner, Value};
use std::collections::HashMap;

const MAX_ARITY: usize = 8;

/// Drives the tokenizer directly into a `Chunk` — there is no intermediate AST. Each
/// grammar production is one method that both consumes tokens and emits bytecode.
pub struct Compiler<'a> {
    tokenizer: Tokenizer<'a>,
    current: Token<'a>,
    previous: Option<Token<'a>>,
    reporter: &'a mut dyn Reporter,

    had_error: bool,
    panic_mode: bool,
    tokens_consumed: usize,

    function_addrs: HashMap<String, u16>,
    function_arities: HashMap<String, u8>,
    aux_stack: Vec<String>,

    chunk: Chunk,
    interner: Interner,
}

pub fn compile(source: &str, reporter: &mut dyn Reporter) -> Result<(Chunk, Interner), ()> {
    let mut tokenizer = Tokenizer::new(source);
    let current = tokenizer.next_token();
    let mut compiler = Compiler {
        tokenizer,
        current,
        previous: None,
        reporter,
        had_error: false,
        panic_mode: false,
        tokens_consumed: 0,
        function_addrs: HashMap::new(),
        function_arities: HashMap::new(),
        aux_stack: Vec::new(),
        chunk: Chunk::new(),
        interner: Interner::new(),
    };

    while compiler.current.typ != TokenType::Eof {
        compiler.statement_sequence_step();
    }
    let _ = compiler.consume(TokenType::Eof, "Expect end of expression.");
    compiler.chunk.emit_instr(Instruction::Return);

    if compiler.had_error {
        Err(())
    } else {
        debug::dump_bytecode(&compiler.chunk);
        Ok((compiler.chunk, compiler.interner))
    }
}

impl<'a> Compiler<'a> {
    // ---- token stream plumbing ----

    fn advance(&mut self) {
        self.previous = Some(self.current);
        loop {
            self.current = self.tokenizer.next_token();
            self.tokens_consumed += 1;
            debug::trace_token(&self.current);
            if self.current.typ != TokenType::Error {
                break;
            }
            let token = self.current;
            self.error_at_phase(Phase::Tokenizing, &token, "Unexpected character.");
        }
    }

    fn check(&self, typ: TokenType) -> bool {
        self.current.typ == typ
    }

    fn consume(&mut self, typ: TokenType, msg: &str) -> Result<(), ()> {
        if self.check(typ) {
            self.advance();
            Ok(())
        } else {
            self.error_at_current(msg);
            Err(())
        }
    }

    fn previous_type(&self) -> TokenType {
        self.previous.expect("previous token set").typ
    }

    fn previous_lexeme(&self) -> String {
        self.previous.expect("previous token set").lexeme.to_string()
    }

    /// Runs one statement; if it errored without consuming anything, forces a single
    /// token of progress. The language has no synchronization-to-statement-boundary
    /// error recovery (SPEC_FULL.md §9.7) — this only prevents an outright hang.
    fn statement_sequence_step(&mut self) {
        let before = self.tokens_consumed;
        if self.statement().is_err()
            && self.tokens_consumed == before
            && self.current.typ != TokenType::Eof
        {
            self.advance();
        }
    }

    // ---- diagnostics ----

    fn error_at_current(&mut self, msg: &str) {
        let token = self.current;
        self.error_at(&token, msg);
    }

    fn error_at_previous(&mut self, msg: &str) {
        let token = self.previous.expect("previous token set");
        self.error_at(&token, msg);
    }

    fn error_at(&mut self, token: &Token, msg: &str) {
        self.error_at_phase(Phase::Parsing, token, msg);
    }

    fn error_at_phase(&mut self, phase: Phase, token: &Token, msg: &str) {
        self.had_error = true;
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.reporter.error(Report::new(phase, msg.to_string(), token));
    }

    /// Reports a full constant pool through the same channel as a syntax error and
    /// turns it into a `Result<(), ()>` for use with `?`.
    fn record_constant<T>(&mut self, result: Result<T, super::chunk::ConstantPoolFull>) -> Result<T, ()> {
        result.map_err(|_| self.error_at_previous("Too many constants in one chunk."))
    }

    fn emit_name_operand(&mut self, name: &str) -> Result<(), ()> {
        let value = Value::String(self.interner.intern(name));
        let result = self.chunk.emit_constant_operand(value);
        self.record_constant(result)?;
        Ok(())
    }

    // ---- statements ----

    fn statement(&mut self) -> Result<(), ()> {
        if self.check(TokenType::Identifier) && self.function_addrs.contains_key(self.current.lexeme)
        {
            self.advance();
            let name = self.previous_lexeme();
            self.function_call(&name)?;
            self.consume(TokenType::Semicolon, "Expect ';' after statement.")?;
            return Ok(());
        }

        match self.current.typ {
            TokenType::Print => self.print_statement(),
            TokenType::LPrint => self.println_statement(),
            TokenType::Identifier => self.assign_identifier(false),
            TokenType::Global => {
                self.advance();
                self.assign_identifier(true)
            }
            TokenType::OBrace => self.group(),
            TokenType::If => self.if_statement(),
            TokenType::While => self.while_statement(),
            TokenType::For => self.for_statement(),
            TokenType::Def => self.define_statement(),
            TokenType::Return => self.return_statement(),
            _ => {
                self.error_at_current("Expect statement.");
                Err(())
            }
        }
    }

    fn print_statement(&mut self) -> Result<(), ()> {
        self.advance();
        self.expression()?;
        self.consume(TokenType::Semicolon, "Expect ';' after statement.")?;
        self.chunk.emit_instr(Instruction::Print);
        Ok(())
    }

    fn println_statement(&mut self) -> Result<(), ()> {
        self.advance();
        self.expression()?;
        self.consume(TokenType::Semicolon, "Expect ';' after statement.")?;
        self.chunk.emit_instr(Instruction::Println);
        Ok(())
    }

    fn assign_identifier(&mut self, force_global: bool) -> Result<(), ()> {
        self.advance(); // identifier
        let name = self.previous_lexeme();

        if self.check(TokenType::Equal) {
            self.advance();
            self.expression()?;
            self.consume(TokenType::Semicolon, "Expect ';' after statement.")?;
        } else {
            match self.current.typ {
                TokenType::PlusEqual
                | TokenType::MinusEqual
                | TokenType::StarEqual
                | TokenType::SlashEqual
                | TokenType::CaretEqual
                | TokenType::PercentEqual => {
                    self.advance();
                    let op_typ = self.previous_type();
                    self.chunk.emit_instr(Instruction::GetVar);
                    self.emit_name_operand(&name)?;
                    self.binary(op_typ)?;
                    self.consume(TokenType::Semicolon, "Expect ';' after statement.")?;
                }
                _ => {
                    self.error_at_current("Expect assignment to identifier.");
                    return Err(());
                }
            }
        }

        if force_global {
            self.chunk.emit_instr(Instruction::SetGlobal);
        } else {
            self.chunk.emit_instr(Instruction::SetVar);
        }
        self.emit_name_operand(&name)
    }

    fn group(&mut self) -> Result<(), ()> {
        self.advance(); // '{'
        while !self.check(TokenType::CBrace) && !self.check(TokenType::Eof) {
            self.statement_sequence_step();
        }
        self.consume(TokenType::CBrace, "Expect '}' after group.")
    }

    fn if_statement(&mut self) -> Result<(), ()> {
        self.advance(); // 'if'
        self.consume(TokenType::OParen, "Expect '(' after 'if'.")?;
        self.expression()?;
        self.consume(TokenType::CParen, "Expect ')' after condition.")?;

        let then_patch = self.chunk.emit_forward_jump(Instruction::JumpIfFalseDiscard);
        self.statement()?;

        if self.check(TokenType::Else) {
            self.advance();
            let else_patch = self.chunk.emit_forward_jump(Instruction::Jump);
            self.chunk.patch_jump(then_patch);
            self.statement()?;
            self.chunk.patch_jump(else_patch);
        } else {
            self.chunk.patch_jump(then_patch);
        }
        Ok(())
    }

    fn while_statement(&mut self) -> Result<(), ()> {
        self.advance(); // 'while'
        self.consume(TokenType::OParen, "Expect '(' after 'while'.")?;
        let cond_addr = self.chunk.len() as u16;
        self.expression()?;
        self.consume(TokenType::CParen, "Expect ')' after condition.")?;

        let exit_patch = self.chunk.emit_forward_jump(Instruction::JumpIfFalseDiscard);
        self.statement()?;
        self.chunk.emit_back_jump(Instruction::Jump, cond_addr);
        self.chunk.patch_jump(exit_patch);
        Ok(())
    }

    fn for_statement(&mut self) -> Result<(), ()> {
        self.advance(); // 'for'
        self.consume(TokenType::OParen, "Expect '(' after 'for'.")?;

        let cond_addr = self.chunk.len() as u16;
        self.expression()?;
        self.consume(TokenType::Semicolon, "Expect ';' after loop condition.")?;

        let exit_patch = self.chunk.emit_forward_jump(Instruction::JumpIfFalseDiscard);
        let body_patch = self.chunk.emit_forward_jump(Instruction::Jump);

        let inc_addr = self.chunk.len() as u16;
        self.statement()?; // increment
        self.chunk.emit_back_jump(Instruction::Jump, cond_addr);

        self.consume(TokenType::CParen, "Expect ')' after for clauses.")?;
        self.chunk.patch_jump(body_patch);
        self.statement()?; // body
        self.chunk.emit_back_jump(Instruction::Jump, inc_addr);
        self.chunk.patch_jump(exit_patch);
        Ok(())
    }

    fn define_statement(&mut self) -> Result<(), ()> {
        if !self.aux_stack.is_empty() {
            self.error_at_current("Internal failure: operand stack not empty at function definition.");
            self.aux_stack.clear();
        }
        self.advance(); // 'def'

        if self.current.typ != TokenType::Identifier {
            self.error_at_current("Expect function name.");
            return Err(());
        }

        let end_function = self.chunk.emit_forward_jump(Instruction::Jump);

        self.advance(); // name
        let name = self.previous_lexeme();
        if self.function_addrs.contains_key(&name) {
            self.error_at_previous("Function has already been defined.");
            return Err(());
        }
        self.function_addrs.insert(name.clone(), self.chunk.len() as u16);

        self.consume(TokenType::OParen, "Expect '(' after function name.")?;
        while !self.check(TokenType::CParen) {
            if self.current.typ != TokenType::Identifier {
                self.error_at_current("Expect parameter name.");
                return Err(());
            }
            self.advance();
            if self.aux_stack.len() >= MAX_ARITY {
                self.error_at_previous("Operand stack limit reached.");
                return Err(());
            }
            self.aux_stack.push(self.previous_lexeme());
            if !self.check(TokenType::CParen) {
                self.consume(TokenType::Comma, "Expect ',' between parameters.")?;
            }
        }
        self.consume(TokenType::CParen, "Expect ')' after parameters.")?;

        self.chunk.emit_instr(Instruction::UpScope);
        let arity = self.aux_stack.len() as u8;
        self.function_arities.insert(name, arity);
        for offset in 1..=arity {
            self.chunk.emit_instr(Instruction::AssignLocal);
            self.chunk.emit_byte(offset);
            let pname = self.aux_stack.pop().expect("arity matches aux stack depth");
            self.emit_name_operand(&pname)?;
        }

        self.consume(TokenType::OBrace, "Expect '{' before function body.")?;
        while !self.check(TokenType::CBrace) && !self.check(TokenType::Eof) {
            self.statement_sequence_step();
        }
        self.consume(TokenType::CBrace, "Expect '}' after function body.")?;

        let result = self.chunk.emit_constant(Value::None);
        self.record_constant(result)?;
        self.chunk.emit_instr(Instruction::Return);
        self.chunk.patch_jump(end_function);
        Ok(())
    }

    fn return_statement(&mut self) -> Result<(), ()> {
        self.advance(); // 'return'
        if self.check(TokenType::Semicolon) {
            let result = self.chunk.emit_constant(Value::None);
            self.record_constant(result)?;
        } else {
            self.expression()?;
        }
        self.consume(TokenType::Semicolon, "Expect ';' after return value.")?;
        self.chunk.emit_instr(Instruction::Return);
        Ok(())
    }

    // ---- function calls ----

    fn function_call(&mut self, name: &str) -> Result<(), ()> {
        self.consume(TokenType::OParen, "Expect '(' after function name.")?;
        let mut given: u8 = 0;
        while !self.check(TokenType::CParen) {
            self.expression()?;
            given += 1;
            if !self.check(TokenType::CParen) {
                self.consume(TokenType::Comma, "Expect ',' between arguments.")?;
            }
        }
        self.consume(TokenType::CParen, "Expect ')' after arguments.")?;

        let arity = *self
            .function_arities
            .get(name)
            .expect("function_addrs and function_arities are kept in sync");
        if given != arity {
            self.error_at_previous("Incorrect number of operands for function call.");
            return Err(());
        }

        self.chunk.emit_instr(Instruction::RaPush);
        let return_addr = self.chunk.len() as u16 + 4;
        let result = self
            .chunk
            .emit_constant_operand(Value::Number(return_addr as f64));
        self.record_constant(result)?;

        let target = *self.function_addrs.get(name).expect("recorded at definition");
        self.chunk.emit_back_jump(Instruction::Jump, target);
        Ok(())
    }

    // ---- expressions (Pratt) ----

    fn expression(&mut self) -> Result<(), ()> {
        self.parse_precedence(Precedence::Assignment)
    }

    fn parse_precedence(&mut self, precedence: Precedence) -> Result<(), ()> {
        self.advance();
        let prefix_typ = self.previous_type();
        if !operators::rule(prefix_typ).prefix {
            self.error_at_previous("Expect expression.");
            return Err(());
        }
        self.compile_prefix(prefix_typ)?;

        loop {
            let infix_prec = operators::rule(self.current.typ)
                .infix
                .map(|(prec, _)| prec)
                .unwrap_or(Precedence::None);
            if precedence > infix_prec {
                break;
            }
            self.advance();
            let op_typ = self.previous_type();
            self.compile_infix(op_typ)?;
        }
        Ok(())
    }

    fn compile_prefix(&mut self, typ: TokenType) -> Result<(), ()> {
        match typ {
            TokenType::Number => self.number(),
            TokenType::String => self.string_literal(),
            TokenType::True => self.literal(Value::Bool(true)),
            TokenType::False => self.literal(Value::Bool(false)),
            TokenType::None => self.literal(Value::None),
            TokenType::Minus => self.unary(),
            TokenType::OParen => self.grouping(),
            TokenType::Identifier => self.identifier(),
            TokenType::Type => self.type_call(),
            TokenType::Len => self.len_call(),
            TokenType::Time => self.time_call(),
            _ => {
                self.error_at_previous("Expect expression.");
                Err(())
            }
        }
    }

    fn compile_infix(&mut self, typ: TokenType) -> Result<(), ()> {
        match typ {
            TokenType::Plus
            | TokenType::Minus
            | TokenType::Star
            | TokenType::Slash
            | TokenType::Caret
            | TokenType::Percent
            | TokenType::BangEqual
            | TokenType::EqualEqual
            | TokenType::Greater
            | TokenType::GreaterEqual
            | TokenType::Less
            | TokenType::LessEqual => self.binary(typ),
            TokenType::And => self.and_op(),
            TokenType::Or => self.or_op(),
            _ => {
                self.error_at_previous("Expect expression.");
                Err(())
            }
        }
    }

    fn number(&mut self) -> Result<(), ()> {
        let lexeme = self.previous.expect("previous token set").lexeme;
        let n: f64 = lexeme.parse().expect("tokenizer only emits well-formed numbers");
        let result = self.chunk.emit_constant(Value::Number(n));
        self.record_constant(result)?;
        Ok(())
    }

    fn string_literal(&mut self) -> Result<(), ()> {
        let lexeme = self.previous.expect("previous token set").lexeme;
        let text = &lexeme[1..lexeme.len() - 1];
        let value = Value::String(self.interner.intern(text));
        let result = self.chunk.emit_constant(value);
        self.record_constant(result)?;
        Ok(())
    }

    fn literal(&mut self, value: Value) -> Result<(), ()> {
        let result = self.chunk.emit_constant(value);
        self.record_constant(result)?;
        Ok(())
    }

    fn unary(&mut self) -> Result<(), ()> {
        self.parse_precedence(Precedence::Unary)?;
        self.chunk.emit_instr(Instruction::Negate);
        Ok(())
    }

    fn grouping(&mut self) -> Result<(), ()> {
        self.expression()?;
        self.consume(TokenType::CParen, "Expect ')' after expression.")
    }

    fn identifier(&mut self) -> Result<(), ()> {
        let name = self.previous_lexeme();
        if self.function_addrs.contains_key(&name) {
            self.function_call(&name)?;
            self.chunk.emit_instr(Instruction::RvPop);
        } else {
            self.chunk.emit_instr(Instruction::GetVar);
            self.emit_name_operand(&name)?;
        }
        Ok(())
    }

    fn type_call(&mut self) -> Result<(), ()> {
        self.consume(TokenType::OParen, "Expect '(' after 'type'.")?;
        self.parse_precedence(Precedence::Call)?;
        self.consume(TokenType::CParen, "Expect ')' after argument.")?;
        self.chunk.emit_instr(Instruction::GetType);
        Ok(())
    }

    fn len_call(&mut self) -> Result<(), ()> {
        self.consume(TokenType::OParen, "Expect '(' after 'len'.")?;
        self.parse_precedence(Precedence::Call)?;
        self.consume(TokenType::CParen, "Expect ')' after argument.")?;
        self.chunk.emit_instr(Instruction::GetLen);
        Ok(())
    }

    fn time_call(&mut self) -> Result<(), ()> {
        self.consume(TokenType::OParen, "Expect '(' after 'time'.")?;
        self.consume(TokenType::CParen, "Expect ')' after 'time('.")?;
        self.chunk.emit_instr(Instruction::GetTime);
        Ok(())
    }

    /// Used both for genuine infix operators (via `compile_infix`) and to desugar
    /// `IDENT OP= EXPR` — `op_typ` may be either the plain or the `...Equal` token, the
    /// emitted opcode is the same either way.
    fn binary(&mut self, op_typ: TokenType) -> Result<(), ()> {
        let prec = operator_precedence(op_typ);
        self.parse_precedence(prec.next())?;
        match op_typ {
            TokenType::Plus | TokenType::PlusEqual => self.chunk.emit_instr(Instruction::Add),
            TokenType::Minus | TokenType::MinusEqual => self.chunk.emit_instr(Instruction::Subtract),
            TokenType::Star | TokenType::StarEqual => self.chunk.emit_instr(Instruction::Multiply),
            TokenType::Slash | TokenType::SlashEqual => self.chunk.emit_instr(Instruction::Divide),
            TokenType::Caret | TokenType::CaretEqual => self.chunk.emit_instr(Instruction::Exponent),
            TokenType::Percent | TokenType::PercentEqual => self.chunk.emit_instr(Instruction::Mod),
            TokenType::BangEqual => {
                self.chunk.emit_instr(Instruction::Equal);
                self.chunk.emit_instr(Instruction::Not);
            }
            TokenType::EqualEqual => self.chunk.emit_instr(Instruction::Equal),
            TokenType::Greater => self.chunk.emit_instr(Instruction::Greater),
            TokenType::GreaterEqual => {
                self.chunk.emit_instr(Instruction::Less);
                self.chunk.emit_instr(Instruction::Not);
            }
            TokenType::Less => self.chunk.emit_instr(Instruction::Less),
            TokenType::LessEqual => {
                self.chunk.emit_instr(Instruction::Greater);
                self.chunk.emit_instr(Instruction::Not);
            }
            _ => unreachable!("binary() only called with arithmetic/comparison tokens"),
        }
        Ok(())
    }

    fn and_op(&mut self) -> Result<(), ()> {
        let patch = self.chunk.emit_forward_jump(Instruction::JumpIfFalse);
        self.chunk.emit_instr(Instruction::Pop);
        self.parse_precedence(Precedence::And)?;
        self.chunk.patch_jump(patch);
        Ok(())
    }

    fn or_op(&mut self) -> Result<(), ()> {
        let patch = self.chunk.emit_forward_jump(Instruction::JumpIfTrue);
        self.chunk.emit_instr(Instruction::Pop);
        self.parse_precedence(Precedence::Or)?;
        self.chunk.patch_jump(patch);
        Ok(())
    }
}

/// Precedence used to parse the right-hand side of a binary operator, including the
/// compound-assignment tokens that never appear in `operators::rule`'s infix table
/// (they're statement-level only, never looked up by the Pratt dispatch loop).
fn operator_precedence(op: TokenType) -> Precedence {
    match op {
        TokenType::Plus | TokenType::Minus | TokenType::PlusEqual | TokenType::MinusEqual => {
            Precedence::Term
        }
        TokenType::Star
        | TokenType::Slash
        | TokenType::Caret
        | TokenType::Percent
        | TokenType::StarEqual
        | TokenType::SlashEqual
        | TokenType::CaretEqual
        | TokenType::PercentEqual => Precedence::Factor,
        TokenType::BangEqual | TokenType::EqualEqual => Precedence::Equality,
        TokenType::Greater | TokenType::GreaterEqual | TokenType::Less | TokenType::LessEqual => {
            Precedence::Comparison
        }
        _ => Precedence::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingReporter {
        errors: Vec<String>,
    }

    impl Reporter for RecordingReporter {
        fn warning(&mut self, _report: Report) {}
        fn error(&mut self, report: Report) {
            self.errors.push(report.msg);
        }
    }

    fn compile_ok(source: &str) -> Chunk {
        let mut reporter = RecordingReporter::default();
        let (chunk, _interner) = compile(source, &mut reporter).expect("should compile");
        chunk
    }

    #[test]
    fn arithmetic_precedence_compiles() {
        let chunk = compile_ok("print 1 + 2 * 3;");
        assert!(chunk.len() > 0);
    }

    #[test]
    fn calling_a_name_not_yet_defined_as_a_function_is_a_compile_error() {
        // Single-pass compilation: `oops` isn't in `function_addrs` yet, so it parses
        // as a bare variable reference and the trailing `(` has no infix binding —
        // the statement's `;` consume then fails.
        let mut reporter = RecordingReporter::default();
        let result = compile("print oops(1);", &mut reporter);
        assert!(result.is_err());
    }

    #[test]
    fn mismatched_call_arity_is_a_compile_error() {
        let mut reporter = RecordingReporter::default();
        let result = compile("def f(a, b) { return a; } print f(1);", &mut reporter);
        assert!(result.is_err());
        assert!(reporter
            .errors
            .iter()
            .any(|m| m.contains("Incorrect number of operands")));
    }

    #[test]
    fn redefining_a_function_is_a_compile_error() {
        let mut reporter = RecordingReporter::default();
        let result = compile("def f() { return 0; } def f() { return 1; }", &mut reporter);
        assert!(result.is_err());
    }

    #[test]
    fn missing_semicolon_is_reported_once_under_panic_mode() {
        let mut reporter = RecordingReporter::default();
        let result = compile("print 1 print 2;", &mut reporter);
        assert!(result.is_err());
        assert_eq!(reporter.errors.len(), 1);
    }
}
