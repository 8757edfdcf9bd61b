//! Quorum certificates.

use crate::crypto::Signature;
use crate::error::{Result, TypesError};
use crate::hash::Hash;
use crate::merkle;
use crate::message::{signing_digest, MessageKind};
use crate::validator::ValidatorSet;
use crate::vote::{exceeds_two_thirds, Vote};
use crate::Hashable;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Proof that more than two thirds of the voting power precommitted
/// `vote.block_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumCertificate {
    /// The precommitted vote.
    pub vote: Vote,

    /// Precommit signatures over `vote`.
    pub signatures: Vec<Signature>,
}

impl QuorumCertificate {
    /// Creates a certificate.
    pub fn new(vote: Vote, signatures: Vec<Signature>) -> Self {
        Self { vote, signatures }
    }

    /// The certificate carried by the genesis block, which has no parent.
    pub fn empty() -> Self {
        Self::new(Vote::nil(0, 0), Vec::new())
    }

    /// Merkle root over the signature set.
    pub fn root(&self) -> Hash {
        merkle::root(&self.signatures)
    }

    /// Validates the certificate for `block_hash` against `validators`.
    ///
    /// Every signature must recover to a distinct member of the set and the
    /// signers' combined power must exceed two thirds of the total.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::InvalidCertificate`] describing the first failure.
    pub fn validate(
        &self,
        block_hash: &Hash,
        genesis: &Hash,
        validators: &ValidatorSet,
    ) -> Result<()> {
        if self.vote.block_hash != *block_hash {
            return Err(TypesError::InvalidCertificate(format!(
                "certificate is for {}, expected {}",
                self.vote.block_hash, block_hash
            )));
        }

        let digest = signing_digest(genesis, MessageKind::Precommit, &self.vote.hash());
        let mut signers = HashSet::with_capacity(self.signatures.len());
        let mut power = 0u64;

        for signature in &self.signatures {
            let address = signature
                .recover(&digest)
                .map_err(|e| TypesError::InvalidCertificate(e.to_string()))?;
            let signer_power = validators.power_of(&address).map_err(|_| {
                TypesError::InvalidCertificate(format!("{} is not a validator", address))
            })?;
            if !signers.insert(address) {
                return Err(TypesError::InvalidCertificate(format!(
                    "{} signed twice",
                    address
                )));
            }
            power = power.saturating_add(signer_power);
        }

        if !exceeds_two_thirds(power, validators.total_power()) {
            return Err(TypesError::InvalidCertificate(format!(
                "signed power {} of {} is not a supermajority",
                power,
                validators.total_power()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Keypair, Signer};
    use crate::validator::Validator;

    struct Fixture {
        keys: Vec<Keypair>,
        validators: ValidatorSet,
        genesis: Hash,
        block: Hash,
    }

    fn fixture() -> Fixture {
        let keys: Vec<_> = (0..3).map(Keypair::from_seed).collect();
        let validators = ValidatorSet::new(vec![
            Validator::new(keys[0].address(), 9),
            Validator::new(keys[1].address(), 20),
            Validator::new(keys[2].address(), 1),
        ])
        .unwrap();
        Fixture {
            keys,
            validators,
            genesis: Hash::digest(b"genesis"),
            block: Hash::digest(b"block"),
        }
    }

    fn certify(f: &Fixture, signers: &[&Keypair]) -> QuorumCertificate {
        let vote = Vote::new(2, 1, f.block);
        let digest = signing_digest(&f.genesis, MessageKind::Precommit, &vote.hash());
        QuorumCertificate::new(vote, signers.iter().map(|k| k.sign(&digest)).collect())
    }

    #[test]
    fn test_supermajority_validates() {
        let f = fixture();
        let qc = certify(&f, &[&f.keys[1], &f.keys[2]]);
        assert!(qc.validate(&f.block, &f.genesis, &f.validators).is_ok());
    }

    #[test]
    fn test_exact_two_thirds_rejected() {
        let f = fixture();
        let qc = certify(&f, &[&f.keys[1]]);
        assert!(matches!(
            qc.validate(&f.block, &f.genesis, &f.validators),
            Err(TypesError::InvalidCertificate(_))
        ));
    }

    #[test]
    fn test_unknown_signer_rejected() {
        let f = fixture();
        let outsider = Keypair::from_seed(42);
        let qc = certify(&f, &[&f.keys[0], &f.keys[1], &outsider]);
        assert!(qc.validate(&f.block, &f.genesis, &f.validators).is_err());
    }

    #[test]
    fn test_duplicate_signer_rejected() {
        let f = fixture();
        let mut qc = certify(&f, &[&f.keys[1]]);
        qc.signatures.push(qc.signatures[0].clone());
        assert!(qc.validate(&f.block, &f.genesis, &f.validators).is_err());
    }

    #[test]
    fn test_invalid_signature_rejected() {
        let f = fixture();
        let mut qc = certify(&f, &[&f.keys[1], &f.keys[2]]);
        qc.signatures[1].bytes[0] ^= 0xff;
        assert!(qc.validate(&f.block, &f.genesis, &f.validators).is_err());
    }

    #[test]
    fn test_wrong_block_or_chain_rejected() {
        let f = fixture();
        let qc = certify(&f, &[&f.keys[0], &f.keys[1], &f.keys[2]]);
        assert!(qc
            .validate(&Hash::digest(b"other"), &f.genesis, &f.validators)
            .is_err());
        assert!(qc
            .validate(&f.block, &Hash::digest(b"other chain"), &f.validators)
            .is_err());
    }

    #[test]
    fn test_root_commits_to_signatures_only() {
        let f = fixture();
        let a = certify(&f, &[&f.keys[1], &f.keys[2]]);
        let mut b = a.clone();
        b.vote.round = 7;
        assert_eq!(a.root(), b.root());
        assert_eq!(QuorumCertificate::empty().root(), Hash::digest(&[]));
    }
}
