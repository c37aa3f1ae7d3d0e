//! Human-readable disassembly of an image.

use super::image::{Image, Instruction, Operand};

/// Disassembler for loaded images.
pub struct Disassembler<'a> {
    image: &'a Image,
    output: String,
}

impl<'a> Disassembler<'a> {
    pub fn new(image: &'a Image) -> Self {
        Self {
            image,
            output: String::new(),
        }
    }

    pub fn disassemble(&mut self) -> &str {
        if self.image.literal_count() > 0 {
            self.output.push_str("== Literals ==\n");
            for (i, lit) in self.image.literals().enumerate() {
                self.output
                    .push_str(&format!("  [{:04}] \"{}\"\n", i, lit.escape_ascii()));
            }
            self.output.push('\n');
        }

        self.output.push_str("== Instructions ==\n");
        for (i, instr) in self.image.instructions().iter().enumerate() {
            // Instruction indices are one-based, like jump targets.
            self.output.push_str(&format!("{:04}: ", i + 1));
            self.disassemble_instruction(instr);
            self.output.push('\n');
        }

        &self.output
    }

    fn disassemble_instruction(&mut self, instr: &Instruction) {
        match instr.op {
            Some(op) => self.output.push_str(op.name()),
            None => self.output.push_str(&format!("<unknown {}>", instr.code)),
        }

        for (i, operand) in instr.operands.iter().enumerate() {
            self.output.push_str(if i == 0 { " " } else { ", " });
            let text = self.format_operand(*operand);
            self.output.push_str(&text);
        }
    }

    fn format_operand(&self, operand: Operand) -> String {
        match operand {
            Operand::Int(n) => format!("#{}", n),
            Operand::Register(r) => format!("r{}", r),
            Operand::Literal(index) => {
                let lit = usize::try_from(index)
                    .ok()
                    .and_then(|i| self.image.literal(i));
                match lit {
                    Some(bytes) => format!("lit[{}] \"{}\"", index, bytes.escape_ascii()),
                    None => format!("lit[{}] <out of range>", index),
                }
            }
        }
    }
}

/// Format an image's literal and instruction tables.
pub fn format_image(image: &Image) -> String {
    let mut disasm = Disassembler::new(image);
    disasm.disassemble().to_string()
}
