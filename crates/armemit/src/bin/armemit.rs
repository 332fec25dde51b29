use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use armemit::CpuFeatures;
use armemit::codegen::a64::Reg;
use armemit::codegen::disasm;
use armemit::codegen::imm::{MovImmPlan, plan_mov_imm};
use armemit::codegen::{Arm64, Emitter, Isa};

#[derive(Parser)]
#[command(name = "armemit", about = "ARM / AArch64 instruction encoder toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode instruction words given in hex.
    Disasm {
        /// Treat the words as A32 instead of A64.
        #[arg(long)]
        arm: bool,
        /// Instruction words, e.g. `8b030041` or `0xd65f03c0`.
        #[arg(required = true)]
        words: Vec<String>,
    },
    /// Show the instructions chosen to load a 64-bit (or 32-bit) constant.
    MovImm {
        /// Load into a W register.
        #[arg(long)]
        w: bool,
        /// The constant, decimal or `0x` hex.
        value: String,
    },
    /// Print the instruction-set extensions of this CPU.
    Cpu,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Disasm { arm, words } => disasm(arm, &words),
        Command::MovImm { w, value } => mov_imm(w, &value),
        Command::Cpu => {
            println!("{}", CpuFeatures::detect());
            Ok(())
        }
    }
}

fn disasm(arm: bool, words: &[String]) -> anyhow::Result<()> {
    let isa = if arm { Isa::A32 } else { Isa::A64 };
    let words = words
        .iter()
        .map(|text| parse_word(text))
        .collect::<anyhow::Result<Vec<u32>>>()?;
    print!("{}", disasm::render_words(isa, &words));
    Ok(())
}

fn mov_imm(w: bool, value: &str) -> anyhow::Result<()> {
    let value = parse_u64(value)?;
    let (rd, bits) = if w { (Reg::w(0), 32) } else { (Reg::x(0), 64) };

    let plan = plan_mov_imm(value, bits)?;
    let kind = match plan {
        MovImmPlan::Orr(_) => "bitmask immediate",
        MovImmPlan::Wide(_) => "move wide",
    };
    println!("; {value:#x} as {rd}: {} instruction(s), {kind}", plan.len());

    let mut e = Emitter::<Arm64>::new();
    e.mov_imm(rd, value)?;
    print!("{}", disasm::render_words(Isa::A64, e.code()));
    Ok(())
}

fn parse_word(text: &str) -> anyhow::Result<u32> {
    let digits = text.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).with_context(|| format!("invalid instruction word {text:?}"))
}

fn parse_u64(text: &str) -> anyhow::Result<u64> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => text.replace('_', "").parse::<u64>(),
    };
    parsed.with_context(|| format!("invalid constant {text:?}"))
}
