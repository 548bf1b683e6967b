//! CLI signature blob decoding and encoding (ECMA-335 II.23.2).
//!
//! The decoder produces context-free [`TypeSig`] trees; token resolution and
//! type materialization happen above this crate. The encoder is the exact
//! inverse for every form this decoder accepts, so decoding a blob this
//! encoder produced and re-encoding it yields the identical bytes.

use crate::{MetadataError, Token, table};

/// Element type byte codes.
pub mod element {
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0a;
    pub const U8: u8 = 0x0b;
    pub const R4: u8 = 0x0c;
    pub const R8: u8 = 0x0d;
    pub const STRING: u8 = 0x0e;
    pub const PTR: u8 = 0x0f;
    pub const BYREF: u8 = 0x10;
    pub const VALUETYPE: u8 = 0x11;
    pub const CLASS: u8 = 0x12;
    pub const VAR: u8 = 0x13;
    pub const ARRAY: u8 = 0x14;
    pub const GENERICINST: u8 = 0x15;
    pub const I: u8 = 0x18;
    pub const U: u8 = 0x19;
    pub const OBJECT: u8 = 0x1c;
    pub const SZARRAY: u8 = 0x1d;
    pub const MVAR: u8 = 0x1e;
}

/// Calling-convention byte bits and signature kind markers.
pub mod convention {
    pub const DEFAULT: u8 = 0x00;
    pub const VARARG: u8 = 0x05;
    pub const FIELD: u8 = 0x06;
    pub const LOCAL_SIG: u8 = 0x07;
    pub const GENERIC: u8 = 0x10;
    pub const HAS_THIS: u8 = 0x20;
    pub const EXPLICIT_THIS: u8 = 0x40;
}

const MAX_RECURSION_DEPTH: usize = 64;

/// A parsed type reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSig {
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    /// native int
    I,
    /// native unsigned int
    U,
    String,
    Object,
    Class(Token),
    ValueType(Token),
    SzArray(Box<TypeSig>),
    Array {
        element: Box<TypeSig>,
        rank: u32,
        sizes: Vec<u32>,
        lower_bounds: Vec<u32>,
    },
    ByRef(Box<TypeSig>),
    Ptr(Box<TypeSig>),
    /// Class generic parameter by position.
    Var(u32),
    /// Method generic parameter by position.
    MVar(u32),
    GenericInst {
        value_type: bool,
        definition: Token,
        args: Vec<TypeSig>,
    },
}

/// A parsed method signature: calling convention, return type (`None` is
/// void), parameter types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSig {
    pub has_this: bool,
    pub explicit_this: bool,
    pub vararg: bool,
    pub generic_params: u32,
    pub return_type: Option<TypeSig>,
    pub params: Vec<TypeSig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSig(pub TypeSig);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalsSig(pub Vec<TypeSig>);

struct SigReader<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> SigReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            depth: 0,
        }
    }

    fn read_u8(&mut self) -> Result<u8, MetadataError> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(MetadataError::Truncated(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    /// ECMA compressed unsigned integer: 1, 2 or 4 bytes.
    fn read_compressed_u32(&mut self) -> Result<u32, MetadataError> {
        let first = self.read_u8()?;
        if first & 0x80 == 0 {
            Ok(first as u32)
        } else if first & 0xc0 == 0x80 {
            let second = self.read_u8()?;
            Ok((((first & 0x3f) as u32) << 8) | second as u32)
        } else if first & 0xe0 == 0xc0 {
            let b2 = self.read_u8()?;
            let b3 = self.read_u8()?;
            let b4 = self.read_u8()?;
            Ok((((first & 0x1f) as u32) << 24) | ((b2 as u32) << 16) | ((b3 as u32) << 8) | b4 as u32)
        } else {
            Err(MetadataError::BadFormat("invalid compressed integer"))
        }
    }

    /// TypeDefOrRef coded token: two tag bits selecting the table.
    fn read_type_def_or_ref(&mut self) -> Result<Token, MetadataError> {
        let coded = self.read_compressed_u32()?;
        let tab = match coded & 0x3 {
            0 => table::TYPE_DEF,
            1 => table::TYPE_REF,
            2 => table::TYPE_SPEC,
            _ => return Err(MetadataError::BadFormat("invalid TypeDefOrRef tag")),
        };
        Ok(Token::new(tab, coded >> 2))
    }

    fn parse_type(&mut self) -> Result<TypeSig, MetadataError> {
        self.depth += 1;
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(MetadataError::RecursionLimit);
        }
        let result = self.parse_type_inner();
        self.depth -= 1;
        result
    }

    fn parse_type_inner(&mut self) -> Result<TypeSig, MetadataError> {
        let code = self.read_u8()?;
        Ok(match code {
            element::BOOLEAN => TypeSig::Boolean,
            element::CHAR => TypeSig::Char,
            element::I1 => TypeSig::I1,
            element::U1 => TypeSig::U1,
            element::I2 => TypeSig::I2,
            element::U2 => TypeSig::U2,
            element::I4 => TypeSig::I4,
            element::U4 => TypeSig::U4,
            element::I8 => TypeSig::I8,
            element::U8 => TypeSig::U8,
            element::R4 => TypeSig::R4,
            element::R8 => TypeSig::R8,
            element::I => TypeSig::I,
            element::U => TypeSig::U,
            element::STRING => TypeSig::String,
            element::OBJECT => TypeSig::Object,
            element::CLASS => TypeSig::Class(self.read_type_def_or_ref()?),
            element::VALUETYPE => TypeSig::ValueType(self.read_type_def_or_ref()?),
            element::SZARRAY => TypeSig::SzArray(Box::new(self.parse_type()?)),
            element::ARRAY => {
                let element = Box::new(self.parse_type()?);
                let rank = self.read_compressed_u32()?;
                let num_sizes = self.read_compressed_u32()?;
                let mut sizes = Vec::with_capacity(num_sizes as usize);
                for _ in 0..num_sizes {
                    sizes.push(self.read_compressed_u32()?);
                }
                let num_lo = self.read_compressed_u32()?;
                let mut lower_bounds = Vec::with_capacity(num_lo as usize);
                for _ in 0..num_lo {
                    lower_bounds.push(self.read_compressed_u32()?);
                }
                TypeSig::Array {
                    element,
                    rank,
                    sizes,
                    lower_bounds,
                }
            }
            element::BYREF => TypeSig::ByRef(Box::new(self.parse_type()?)),
            element::PTR => TypeSig::Ptr(Box::new(self.parse_type()?)),
            element::VAR => TypeSig::Var(self.read_compressed_u32()?),
            element::MVAR => TypeSig::MVar(self.read_compressed_u32()?),
            element::GENERICINST => {
                let kind = self.read_u8()?;
                let value_type = match kind {
                    element::CLASS => false,
                    element::VALUETYPE => true,
                    other => return Err(MetadataError::IllegalElementType(other)),
                };
                let definition = self.read_type_def_or_ref()?;
                let count = self.read_compressed_u32()?;
                let mut args = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    args.push(self.parse_type()?);
                }
                TypeSig::GenericInst {
                    value_type,
                    definition,
                    args,
                }
            }
            other => return Err(MetadataError::IllegalElementType(other)),
        })
    }
}

pub fn parse_field_sig(blob: &[u8]) -> Result<FieldSig, MetadataError> {
    let mut r = SigReader::new(blob);
    let kind = r.read_u8()?;
    if kind & 0x0f != convention::FIELD {
        return Err(MetadataError::BadFormat("field signature expected"));
    }
    Ok(FieldSig(r.parse_type()?))
}

pub fn parse_method_sig(blob: &[u8]) -> Result<MethodSig, MetadataError> {
    let mut r = SigReader::new(blob);
    let conv = r.read_u8()?;
    let generic_params = if conv & convention::GENERIC != 0 {
        r.read_compressed_u32()?
    } else {
        0
    };
    let param_count = r.read_compressed_u32()?;
    let return_type = match r.data.get(r.pos) {
        Some(&b) if b == element::VOID => {
            r.pos += 1;
            None
        }
        _ => Some(r.parse_type()?),
    };
    let mut params = Vec::with_capacity(param_count as usize);
    for _ in 0..param_count {
        params.push(r.parse_type()?);
    }
    Ok(MethodSig {
        has_this: conv & convention::HAS_THIS != 0,
        explicit_this: conv & convention::EXPLICIT_THIS != 0,
        vararg: conv & 0x0f == convention::VARARG,
        generic_params,
        return_type,
        params,
    })
}

pub fn parse_locals_sig(blob: &[u8]) -> Result<LocalsSig, MetadataError> {
    let mut r = SigReader::new(blob);
    let kind = r.read_u8()?;
    if kind != convention::LOCAL_SIG {
        return Err(MetadataError::BadFormat("locals signature expected"));
    }
    let count = r.read_compressed_u32()?;
    let mut locals = Vec::with_capacity(count as usize);
    for _ in 0..count {
        locals.push(r.parse_type()?);
    }
    Ok(LocalsSig(locals))
}

pub fn parse_type_spec(blob: &[u8]) -> Result<TypeSig, MetadataError> {
    let mut r = SigReader::new(blob);
    r.parse_type()
}

struct SigWriter {
    buf: Vec<u8>,
}

impl SigWriter {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn write_u8(&mut self, b: u8) {
        self.buf.push(b);
    }

    fn write_compressed_u32(&mut self, v: u32) {
        if v < 0x80 {
            self.buf.push(v as u8);
        } else if v < 0x4000 {
            self.buf.push(0x80 | (v >> 8) as u8);
            self.buf.push(v as u8);
        } else {
            self.buf.push(0xc0 | (v >> 24) as u8);
            self.buf.push((v >> 16) as u8);
            self.buf.push((v >> 8) as u8);
            self.buf.push(v as u8);
        }
    }

    fn write_type_def_or_ref(&mut self, token: Token) {
        let tag = match token.table {
            table::TYPE_DEF => 0,
            table::TYPE_REF => 1,
            table::TYPE_SPEC => 2,
            _ => unreachable!("not a TypeDefOrRef token"),
        };
        self.write_compressed_u32((token.index << 2) | tag);
    }

    fn write_type(&mut self, sig: &TypeSig) {
        match sig {
            TypeSig::Boolean => self.write_u8(element::BOOLEAN),
            TypeSig::Char => self.write_u8(element::CHAR),
            TypeSig::I1 => self.write_u8(element::I1),
            TypeSig::U1 => self.write_u8(element::U1),
            TypeSig::I2 => self.write_u8(element::I2),
            TypeSig::U2 => self.write_u8(element::U2),
            TypeSig::I4 => self.write_u8(element::I4),
            TypeSig::U4 => self.write_u8(element::U4),
            TypeSig::I8 => self.write_u8(element::I8),
            TypeSig::U8 => self.write_u8(element::U8),
            TypeSig::R4 => self.write_u8(element::R4),
            TypeSig::R8 => self.write_u8(element::R8),
            TypeSig::I => self.write_u8(element::I),
            TypeSig::U => self.write_u8(element::U),
            TypeSig::String => self.write_u8(element::STRING),
            TypeSig::Object => self.write_u8(element::OBJECT),
            TypeSig::Class(t) => {
                self.write_u8(element::CLASS);
                self.write_type_def_or_ref(*t);
            }
            TypeSig::ValueType(t) => {
                self.write_u8(element::VALUETYPE);
                self.write_type_def_or_ref(*t);
            }
            TypeSig::SzArray(inner) => {
                self.write_u8(element::SZARRAY);
                self.write_type(inner);
            }
            TypeSig::Array {
                element: inner,
                rank,
                sizes,
                lower_bounds,
            } => {
                self.write_u8(element::ARRAY);
                self.write_type(inner);
                self.write_compressed_u32(*rank);
                self.write_compressed_u32(sizes.len() as u32);
                for s in sizes {
                    self.write_compressed_u32(*s);
                }
                self.write_compressed_u32(lower_bounds.len() as u32);
                for l in lower_bounds {
                    self.write_compressed_u32(*l);
                }
            }
            TypeSig::ByRef(inner) => {
                self.write_u8(element::BYREF);
                self.write_type(inner);
            }
            TypeSig::Ptr(inner) => {
                self.write_u8(element::PTR);
                self.write_type(inner);
            }
            TypeSig::Var(n) => {
                self.write_u8(element::VAR);
                self.write_compressed_u32(*n);
            }
            TypeSig::MVar(n) => {
                self.write_u8(element::MVAR);
                self.write_compressed_u32(*n);
            }
            TypeSig::GenericInst {
                value_type,
                definition,
                args,
            } => {
                self.write_u8(element::GENERICINST);
                self.write_u8(if *value_type {
                    element::VALUETYPE
                } else {
                    element::CLASS
                });
                self.write_type_def_or_ref(*definition);
                self.write_compressed_u32(args.len() as u32);
                for a in args {
                    self.write_type(a);
                }
            }
        }
    }
}

pub fn encode_field_sig(sig: &FieldSig) -> Vec<u8> {
    let mut w = SigWriter::new();
    w.write_u8(convention::FIELD);
    w.write_type(&sig.0);
    w.buf
}

pub fn encode_method_sig(sig: &MethodSig) -> Vec<u8> {
    let mut w = SigWriter::new();
    let mut conv = if sig.vararg {
        convention::VARARG
    } else {
        convention::DEFAULT
    };
    if sig.has_this {
        conv |= convention::HAS_THIS;
    }
    if sig.explicit_this {
        conv |= convention::EXPLICIT_THIS;
    }
    if sig.generic_params > 0 {
        conv |= convention::GENERIC;
    }
    w.write_u8(conv);
    if sig.generic_params > 0 {
        w.write_compressed_u32(sig.generic_params);
    }
    w.write_compressed_u32(sig.params.len() as u32);
    match &sig.return_type {
        None => w.write_u8(element::VOID),
        Some(t) => w.write_type(t),
    }
    for p in &sig.params {
        w.write_type(p);
    }
    w.buf
}

pub fn encode_locals_sig(sig: &LocalsSig) -> Vec<u8> {
    let mut w = SigWriter::new();
    w.write_u8(convention::LOCAL_SIG);
    w.write_compressed_u32(sig.0.len() as u32);
    for t in &sig.0 {
        w.write_type(t);
    }
    w.buf
}

pub fn encode_type_spec(sig: &TypeSig) -> Vec<u8> {
    let mut w = SigWriter::new();
    w.write_type(sig);
    w.buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_sig_round_trip() {
        let sig = MethodSig {
            has_this: true,
            explicit_this: false,
            vararg: false,
            generic_params: 0,
            return_type: Some(TypeSig::I4),
            params: vec![
                TypeSig::SzArray(Box::new(TypeSig::String)),
                TypeSig::ByRef(Box::new(TypeSig::ValueType(Token::new(table::TYPE_DEF, 7)))),
            ],
        };
        let blob = encode_method_sig(&sig);
        let parsed = parse_method_sig(&blob).unwrap();
        assert_eq!(parsed, sig);
        assert_eq!(encode_method_sig(&parsed), blob);
    }

    #[test]
    fn void_return_is_none() {
        let sig = MethodSig {
            has_this: false,
            explicit_this: false,
            vararg: false,
            generic_params: 0,
            return_type: None,
            params: vec![],
        };
        let blob = encode_method_sig(&sig);
        assert_eq!(blob, vec![0x00, 0x00, 0x01]);
        assert_eq!(parse_method_sig(&blob).unwrap().return_type, None);
    }

    #[test]
    fn generic_inst_round_trip() {
        let sig = TypeSig::GenericInst {
            value_type: false,
            definition: Token::new(table::TYPE_DEF, 3),
            args: vec![TypeSig::I4, TypeSig::Var(1)],
        };
        let blob = encode_type_spec(&sig);
        assert_eq!(parse_type_spec(&blob).unwrap(), sig);
    }

    #[test]
    fn compressed_integer_widths() {
        let mut w = SigWriter::new();
        w.write_compressed_u32(0x7f);
        w.write_compressed_u32(0x80);
        w.write_compressed_u32(0x3fff);
        w.write_compressed_u32(0x4000);
        let mut r = SigReader::new(&w.buf);
        assert_eq!(r.read_compressed_u32().unwrap(), 0x7f);
        assert_eq!(r.read_compressed_u32().unwrap(), 0x80);
        assert_eq!(r.read_compressed_u32().unwrap(), 0x3fff);
        assert_eq!(r.read_compressed_u32().unwrap(), 0x4000);
    }

    #[test]
    fn truncated_blob_is_bad_format() {
        assert!(matches!(
            parse_field_sig(&[convention::FIELD]),
            Err(MetadataError::Truncated(_))
        ));
        assert!(matches!(
            parse_field_sig(&[convention::FIELD, 0x45]),
            Err(MetadataError::IllegalElementType(0x45))
        ));
    }

    #[test]
    fn field_sig_requires_marker() {
        assert!(parse_field_sig(&[0x00, element::I4]).is_err());
    }
}
