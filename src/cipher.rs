//! Authenticated per-datagram encryption.
//!
//! Every datagram is AES-128-CBC encrypted under a fresh random IV and
//! authenticated with an HMAC-SHA-256 tag truncated to 16 bytes, computed
//! over `IV || ciphertext`. The tag is verified before any decryption work
//! touches the payload.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes128;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::CipherError;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type HmacSha256 = Hmac<Sha256>;

/// Symmetric key length in bytes.
pub const KEY_SIZE: usize = 16;
/// Initialization vector length in bytes.
pub const IV_SIZE: usize = 16;
/// Truncated MAC length in bytes.
pub const TAG_SIZE: usize = 16;
/// AES block size; padding adds at most one block.
pub const BLOCK_SIZE: usize = 16;
/// Fixed crypto header on every sealed datagram: tag + iv + ciphertext length.
pub const SEALED_HEADER_SIZE: usize = TAG_SIZE + IV_SIZE + 4;

/// A sealed payload: the three outputs of `seal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPacket {
    pub tag: [u8; TAG_SIZE],
    pub iv: [u8; IV_SIZE],
    pub ciphertext: Vec<u8>,
}

/// Per-session packet cipher holding the shared symmetric key.
///
/// `seal` never fails on valid input; `open` fails closed on any
/// authentication or framing problem.
#[derive(Clone)]
pub struct PacketCipher {
    key: [u8; KEY_SIZE],
}

impl PacketCipher {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Encrypt and authenticate a plaintext under a fresh random IV.
    pub fn seal(&self, plaintext: &[u8]) -> SealedPacket {
        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext = Aes128CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let tag = self.compute_tag(&iv, &ciphertext);

        SealedPacket { tag, iv, ciphertext }
    }

    /// Verify the tag and decrypt. The MAC check runs before any block of
    /// ciphertext is decrypted.
    pub fn open(&self, sealed: &SealedPacket) -> Result<Vec<u8>, CipherError> {
        if sealed.ciphertext.is_empty() || sealed.ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CipherError::MalformedPacket("ciphertext not block-aligned"));
        }

        let mut mac = HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key size");
        mac.update(&sealed.iv);
        mac.update(&sealed.ciphertext);
        mac.verify_truncated_left(&sealed.tag)
            .map_err(|_| CipherError::AuthenticationFailed)?;

        Aes128CbcDec::new(&self.key.into(), &sealed.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&sealed.ciphertext)
            .map_err(|_| CipherError::MalformedPacket("bad padding"))
    }

    /// Seal a plaintext into the on-wire datagram layout:
    /// `[tag 16][iv 16][ciphertext_len u32 BE][ciphertext]`.
    pub fn seal_datagram(&self, plaintext: &[u8]) -> Vec<u8> {
        let sealed = self.seal(plaintext);
        let mut out = Vec::with_capacity(SEALED_HEADER_SIZE + sealed.ciphertext.len());
        out.extend_from_slice(&sealed.tag);
        out.extend_from_slice(&sealed.iv);
        out.extend_from_slice(&(sealed.ciphertext.len() as u32).to_be_bytes());
        out.extend_from_slice(&sealed.ciphertext);
        out
    }

    /// Parse and open an on-wire datagram produced by `seal_datagram`.
    pub fn open_datagram(&self, datagram: &[u8]) -> Result<Vec<u8>, CipherError> {
        if datagram.len() < SEALED_HEADER_SIZE {
            return Err(CipherError::MalformedPacket("datagram shorter than header"));
        }

        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&datagram[..TAG_SIZE]);
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&datagram[TAG_SIZE..TAG_SIZE + IV_SIZE]);

        let len_field = &datagram[TAG_SIZE + IV_SIZE..SEALED_HEADER_SIZE];
        let cipher_len = u32::from_be_bytes([len_field[0], len_field[1], len_field[2], len_field[3]]) as usize;

        if datagram.len() != SEALED_HEADER_SIZE + cipher_len {
            return Err(CipherError::MalformedPacket("length field disagrees with datagram"));
        }

        let sealed = SealedPacket {
            tag,
            iv,
            ciphertext: datagram[SEALED_HEADER_SIZE..].to_vec(),
        };
        self.open(&sealed)
    }

    /// Upper bound on the sealed size of a plaintext, for buffer sizing.
    pub const fn sealed_size_bound(plaintext_len: usize) -> usize {
        SEALED_HEADER_SIZE + plaintext_len + BLOCK_SIZE
    }

    fn compute_tag(&self, iv: &[u8], ciphertext: &[u8]) -> [u8; TAG_SIZE] {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key size");
        mac.update(iv);
        mac.update(ciphertext);
        let full = mac.finalize().into_bytes();
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&full[..TAG_SIZE]);
        tag
    }
}
