//! Feature-gated dump helpers. With none of the `debug-*` features enabled every
//! function here is a no-op, so the call sites in `compiler.rs`/`vm.rs` cost nothing
//! in a release build.

#[cfg(feature = "debug-tokens")]
pub fn trace_token(token: &super::token::Token) {
    use colored::Colorize;
    eprintln!("{} {:?}", "token".dimmed(), token);
}

#[cfg(not(feature = "debug-tokens"))]
pub fn trace_token(_token: &super::token::Token) {}

#[cfg(feature = "debug-execution")]
pub fn trace_execution(instr: super::chunk::Instruction, stack: &[super::value::Value], scope: u32) {
    use colored::Colorize;
    let rendered: Vec<String> = stack.iter().map(|v| format!("[{v}]")).collect();
    eprintln!(
        "{} {:<12?} {} {}",
        "exec".dimmed(),
        instr,
        format!("scope={scope}").dimmed(),
        rendered.join(" ")
    );
}

#[cfg(not(feature = "debug-execution"))]
pub fn trace_execution(
    _instr: super::chunk::Instruction,
    _stack: &[super::value::Value],
    _scope: u32,
) {
}

#[cfg(feature = "debug-bytecode")]
pub fn dump_bytecode(chunk: &super::chunk::Chunk) {
    eprint!("{}", chunk.disassemble("program"));
}

#[cfg(not(feature = "debug-bytecode"))]
pub fn dump_bytecode(_chunk: &super::chunk::Chunk) {}
