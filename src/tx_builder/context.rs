//! Instruction/signer accumulator threaded through the builders
//!
//! Builders take an [`InstructionBatch`] by value and hand back a new one
//! with exactly one instruction appended, so the order a pipeline stages
//! instructions in is the order they are signed in.

use solana_sdk::{
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};

/// Ordered instructions plus the auxiliary signers they require
///
/// The payer is not stored here; the assembler signs with it first.
#[derive(Default)]
pub struct InstructionBatch {
    instructions: Vec<Instruction>,
    signers: Vec<Keypair>,
}

impl InstructionBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one instruction
    pub fn push(mut self, instruction: Instruction) -> Self {
        self.instructions.push(instruction);
        self
    }

    /// Append one instruction together with a signer it needs
    pub fn push_signed(mut self, instruction: Instruction, signer: Keypair) -> Self {
        self.instructions.push(instruction);
        if !self.signers.iter().any(|s| s.pubkey() == signer.pubkey()) {
            self.signers.push(signer);
        }
        self
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn signers(&self) -> &[Keypair] {
        &self.signers
    }

    pub fn signer_pubkeys(&self) -> Vec<Pubkey> {
        self.signers.iter().map(|s| s.pubkey()).collect()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Program ids in instruction order
    pub fn program_ids(&self) -> Vec<Pubkey> {
        self.instructions.iter().map(|ix| ix.program_id).collect()
    }
}

impl std::fmt::Debug for InstructionBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstructionBatch")
            .field("instructions", &self.instructions.len())
            .field("programs", &self.program_ids())
            .field("signers", &self.signer_pubkeys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::instruction::AccountMeta;

    fn ix(program: Pubkey) -> Instruction {
        Instruction::new_with_bytes(program, &[1], vec![AccountMeta::new(Pubkey::new_unique(), false)])
    }

    #[test]
    fn test_order_is_preserved() {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let batch = InstructionBatch::new().push(ix(a)).push(ix(b));
        assert_eq!(batch.program_ids(), vec![a, b]);
        assert!(batch.signers().is_empty());
    }

    #[test]
    fn test_signers_are_deduplicated() {
        let kp = Keypair::new();
        let bytes = kp.to_bytes();
        let again = Keypair::try_from(bytes.as_slice()).unwrap();
        let program = Pubkey::new_unique();

        let batch = InstructionBatch::new()
            .push_signed(ix(program), kp)
            .push_signed(ix(program), again);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.signers().len(), 1);
    }
}
