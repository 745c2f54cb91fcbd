//! Legacy (pre-segwit) transaction encoding and signature hashing.
//!
//! # Wire format
//! ```text
//! version (i32 LE) || varint(n_in) || inputs || varint(n_out) || outputs || lock_time (u32 LE)
//! input  = prev txid (32, internal order) || vout (u32 LE) || varint(len) || scriptSig || sequence (u32 LE)
//! output = value (u64 LE) || varint(len) || scriptPubKey
//! ```

use serde::{Deserialize, Serialize};

use crate::constants::{P2PKH_INPUT_SIZE, P2PKH_OUTPUT_SIZE, TX_OVERHEAD_SIZE};
use crate::crypto::sha256d;
use crate::error::TransactionError;
use crate::script::Script;
use crate::types::{OutPoint, Txid};

/// A transaction input spending a previous output.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub previous_output: OutPoint,
    /// Unlocking script. Empty until the input is signed.
    pub script_sig: Script,
    pub sequence: u32,
}

/// A transaction output.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    /// Value in satoshis.
    pub value: u64,
    pub script_pubkey: Script,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    /// Consensus serialization.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.estimated_size() as usize);
        buf.extend_from_slice(&self.version.to_le_bytes());
        write_varint(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            encode_input(&mut buf, input, input.script_sig.as_bytes());
        }
        write_varint(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            encode_output(&mut buf, output);
        }
        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        buf
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.encode())
    }

    /// Parse a consensus-serialized transaction. Rejects trailing bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, TransactionError> {
        let mut r = Reader { bytes, pos: 0 };
        let version = i32::from_le_bytes(r.array()?);

        let n_in = r.varint()?;
        let mut inputs = Vec::with_capacity(n_in.min(1024) as usize);
        for _ in 0..n_in {
            let txid = Txid(r.array()?);
            let vout = u32::from_le_bytes(r.array()?);
            let script_len = r.varint()? as usize;
            let script_sig = Script::from_bytes(r.take(script_len)?.to_vec());
            let sequence = u32::from_le_bytes(r.array()?);
            inputs.push(TxIn {
                previous_output: OutPoint { txid, vout },
                script_sig,
                sequence,
            });
        }

        let n_out = r.varint()?;
        let mut outputs = Vec::with_capacity(n_out.min(1024) as usize);
        for _ in 0..n_out {
            let value = u64::from_le_bytes(r.array()?);
            let script_len = r.varint()? as usize;
            let script_pubkey = Script::from_bytes(r.take(script_len)?.to_vec());
            outputs.push(TxOut { value, script_pubkey });
        }

        let lock_time = u32::from_le_bytes(r.array()?);
        if r.pos != bytes.len() {
            return Err(TransactionError::TrailingBytes(bytes.len() - r.pos));
        }

        Ok(Self { version, inputs, outputs, lock_time })
    }

    pub fn from_hex(s: &str) -> Result<Self, TransactionError> {
        let bytes = hex::decode(s).map_err(|e| TransactionError::InvalidHex(e.to_string()))?;
        Self::decode(&bytes)
    }

    /// Double-SHA256 of the serialization.
    pub fn txid(&self) -> Txid {
        Txid(sha256d(&self.encode()))
    }

    /// Legacy signature hash for `input_index`.
    ///
    /// Serializes a copy of the transaction in which the signed input carries
    /// `script_code` (the spent output's locking script) and every other input
    /// an empty script, appends `sighash_type` as u32 LE and double-hashes.
    /// Only `SIGHASH_ALL` semantics are produced.
    pub fn signature_hash(
        &self,
        input_index: usize,
        script_code: &Script,
        sighash_type: u32,
    ) -> Result<[u8; 32], TransactionError> {
        if input_index >= self.inputs.len() {
            return Err(TransactionError::InputIndexOutOfBounds {
                index: input_index,
                len: self.inputs.len(),
            });
        }

        let mut buf = Vec::with_capacity(self.estimated_size() as usize + 4);
        buf.extend_from_slice(&self.version.to_le_bytes());
        write_varint(&mut buf, self.inputs.len() as u64);
        for (i, input) in self.inputs.iter().enumerate() {
            let script: &[u8] = if i == input_index { script_code.as_bytes() } else { &[] };
            encode_input(&mut buf, input, script);
        }
        write_varint(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            encode_output(&mut buf, output);
        }
        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        buf.extend_from_slice(&sighash_type.to_le_bytes());
        Ok(sha256d(&buf))
    }

    /// Sum of output values, or `None` on overflow.
    pub fn output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }

    /// Size of this transaction once every input carries a P2PKH signature.
    pub fn estimated_size(&self) -> u64 {
        estimate_size(self.inputs.len(), self.outputs.len())
    }
}

/// Upper-bound serialized size of a P2PKH transaction with the given shape.
pub fn estimate_size(n_inputs: usize, n_outputs: usize) -> u64 {
    TX_OVERHEAD_SIZE
        + varint_len(n_inputs as u64)
        + P2PKH_INPUT_SIZE * n_inputs as u64
        + varint_len(n_outputs as u64)
        + P2PKH_OUTPUT_SIZE * n_outputs as u64
}

fn encode_input(buf: &mut Vec<u8>, input: &TxIn, script: &[u8]) {
    buf.extend_from_slice(input.previous_output.txid.as_bytes());
    buf.extend_from_slice(&input.previous_output.vout.to_le_bytes());
    write_varint(buf, script.len() as u64);
    buf.extend_from_slice(script);
    buf.extend_from_slice(&input.sequence.to_le_bytes());
}

fn encode_output(buf: &mut Vec<u8>, output: &TxOut) {
    buf.extend_from_slice(&output.value.to_le_bytes());
    write_varint(buf, output.script_pubkey.len() as u64);
    buf.extend_from_slice(output.script_pubkey.as_bytes());
}

/// Append a Bitcoin CompactSize integer.
pub fn write_varint(buf: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => buf.push(n as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&n.to_le_bytes());
        }
    }
}

/// Encoded length of a CompactSize integer.
pub fn varint_len(n: u64) -> u64 {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], TransactionError> {
        let end = self.pos.checked_add(n).ok_or(TransactionError::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(TransactionError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], TransactionError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn varint(&mut self) -> Result<u64, TransactionError> {
        let prefix = self.array::<1>()?[0];
        Ok(match prefix {
            0xfd => u16::from_le_bytes(self.array()?) as u64,
            0xfe => u32::from_le_bytes(self.array()?) as u64,
            0xff => u64::from_le_bytes(self.array()?),
            n => n as u64,
        })
    }
}
