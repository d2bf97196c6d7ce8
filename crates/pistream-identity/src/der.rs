//! Just enough DER to pull the signature out of an X.509 certificate.

const TAG_SEQUENCE: u8 = 0x30;
const TAG_BIT_STRING: u8 = 0x03;

/// Returns `(tag, value, rest)` for the first TLV in `input`.
fn read_tlv(input: &[u8]) -> Option<(u8, &[u8], &[u8])> {
    let (&tag, rest) = input.split_first()?;
    let (&first, mut rest) = rest.split_first()?;
    let len = if first & 0x80 == 0 {
        first as usize
    } else {
        let count = (first & 0x7f) as usize;
        if count == 0 || count > 4 || rest.len() < count {
            return None;
        }
        let len = rest[..count].iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
        rest = &rest[count..];
        len
    };
    if rest.len() < len {
        return None;
    }
    Some((tag, &rest[..len], &rest[len..]))
}

/// The `signatureValue` bytes of a DER certificate.
///
/// `Certificate ::= SEQUENCE { tbsCertificate, signatureAlgorithm, signatureValue BIT STRING }`
pub fn certificate_signature(cert_der: &[u8]) -> Option<&[u8]> {
    let (tag, body, _) = read_tlv(cert_der)?;
    if tag != TAG_SEQUENCE {
        return None;
    }
    let (_, _tbs, body) = read_tlv(body)?;
    let (_, _alg, body) = read_tlv(body)?;
    let (tag, bits, _) = read_tlv(body)?;
    if tag != TAG_BIT_STRING {
        return None;
    }
    // first octet is the unused-bit count
    bits.split_first().map(|(_, sig)| sig)
}
