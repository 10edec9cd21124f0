//! Section I/O.
//!
//! [`SectionReader`] is a bounds-checked cursor over a resident image; all offsets are
//! absolute file offsets. [`SectionWriter`] is one named output section: it knows the
//! absolute offset it will land at and the byte budget the capacity planner gave it,
//! and refuses to grow past that budget.

use crate::error::{malformed, Error, Result};
use crate::format::encoded_value::{self, EncodedValue};
use crate::format::items::{
    Annotation, AnnotationElement, CatchHandler, ClassData, ClassDef, Code, DexString,
    EncodedField, EncodedMethod, FieldId, MethodId, ProtoId, Try, TypeList,
};
use crate::format::{leb128, mutf8};
use crate::utils::four_byte_align;

pub struct SectionReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> SectionReader<'a> {
    pub fn new(data: &'a [u8], position: u32) -> Self {
        Self {
            data,
            position: position as usize,
        }
    }

    pub fn position(&self) -> u32 {
        self.position as u32
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                malformed!(
                    "read of {} bytes at 0x{:x} runs past end of file (0x{:x})",
                    len,
                    self.position,
                    self.data.len()
                )
            })?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_uleb128(&mut self) -> Result<u32> {
        let rest = self.data.get(self.position..).unwrap_or_default();
        let (value, len) = leb128::read_unsigned(rest)
            .ok_or_else(|| malformed!("bad uleb128 at 0x{:x}", self.position))?;
        self.position += len;
        Ok(value)
    }

    pub fn read_sleb128(&mut self) -> Result<i32> {
        let rest = self.data.get(self.position..).unwrap_or_default();
        let (value, len) = leb128::read_signed(rest)
            .ok_or_else(|| malformed!("bad sleb128 at 0x{:x}", self.position))?;
        self.position += len;
        Ok(value)
    }

    pub fn read_u16_array(&mut self, len: usize) -> Result<Vec<u16>> {
        let bytes = self.read_bytes(len.checked_mul(2).ok_or_else(|| malformed!("array too long"))?)?;
        Ok(bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect())
    }

    /// Skips padding up to the next 4-byte boundary.
    pub fn align_to_four_bytes(&mut self) {
        self.position = four_byte_align(self.position as u32) as usize;
    }

    /// Reads a `string_id_item` and the string data it points at.
    pub fn read_string(&mut self) -> Result<DexString> {
        let offset = self.read_u32()?;
        SectionReader::new(self.data, offset).read_string_data()
    }

    pub fn read_string_data(&mut self) -> Result<DexString> {
        let start = self.position;
        let declared = self.read_uleb128()?;
        let rest = self.data.get(self.position..).unwrap_or_default();
        let (units, consumed) = mutf8::decode(rest)?;
        if units.len() != declared as usize {
            return Err(malformed!(
                "string at 0x{:x} declares length {} but decodes to {}",
                start,
                declared,
                units.len()
            ));
        }
        self.position += consumed;
        Ok(DexString { units })
    }

    pub fn read_type_list(&mut self) -> Result<TypeList> {
        let size = self.read_u32()?;
        let types = self.read_u16_array(size as usize)?;
        self.align_to_four_bytes();
        Ok(TypeList { types })
    }

    pub fn read_proto_id(&mut self) -> Result<ProtoId> {
        let shorty_index = self.read_u32()?;
        let return_type_index = self.read_u32()?;
        let parameters_off = self.read_u32()?;
        Ok(ProtoId {
            return_type_index,
            parameters_off,
            shorty_index,
        })
    }

    pub fn read_field_id(&mut self) -> Result<FieldId> {
        let declaring_class_index = self.read_u16()?;
        let type_index = self.read_u16()?;
        let name_index = self.read_u32()?;
        Ok(FieldId {
            declaring_class_index,
            name_index,
            type_index,
        })
    }

    pub fn read_method_id(&mut self) -> Result<MethodId> {
        let declaring_class_index = self.read_u16()?;
        let proto_index = self.read_u16()?;
        let name_index = self.read_u32()?;
        Ok(MethodId {
            declaring_class_index,
            name_index,
            proto_index,
        })
    }

    pub fn read_class_def(&mut self) -> Result<ClassDef> {
        Ok(ClassDef {
            type_index: self.read_u32()?,
            access_flags: self.read_u32()?,
            supertype_index: self.read_u32()?,
            interfaces_off: self.read_u32()?,
            source_file_index: self.read_u32()?,
            annotations_off: self.read_u32()?,
            class_data_off: self.read_u32()?,
            static_values_off: self.read_u32()?,
        })
    }

    pub fn read_annotation(&mut self) -> Result<Annotation> {
        let visibility = self.read_u8()?;
        let type_index = self.read_uleb128()?;
        let size = self.read_uleb128()?;
        let mut elements = Vec::with_capacity(size.min(1024) as usize);
        for _ in 0..size {
            let name_index = self.read_uleb128()?;
            let value = self.read_encoded_value()?;
            elements.push(AnnotationElement { name_index, value });
        }
        Ok(Annotation {
            type_index,
            visibility,
            elements,
        })
    }

    pub fn read_encoded_value(&mut self) -> Result<EncodedValue> {
        let start = self.position;
        encoded_value::transcode_value(self, &mut Vec::new(), &mut |_, index| Ok(index))?;
        Ok(EncodedValue(self.data[start..self.position].to_vec()))
    }

    pub fn read_encoded_array(&mut self) -> Result<EncodedValue> {
        let start = self.position;
        encoded_value::transcode_array(self, &mut Vec::new(), &mut |_, index| Ok(index))?;
        Ok(EncodedValue(self.data[start..self.position].to_vec()))
    }

    pub fn read_class_data(&mut self) -> Result<ClassData> {
        let static_fields_size = self.read_uleb128()?;
        let instance_fields_size = self.read_uleb128()?;
        let direct_methods_size = self.read_uleb128()?;
        let virtual_methods_size = self.read_uleb128()?;
        Ok(ClassData {
            static_fields: self.read_fields(static_fields_size)?,
            instance_fields: self.read_fields(instance_fields_size)?,
            direct_methods: self.read_methods(direct_methods_size)?,
            virtual_methods: self.read_methods(virtual_methods_size)?,
        })
    }

    fn read_fields(&mut self, count: u32) -> Result<Vec<EncodedField>> {
        let mut fields = Vec::new();
        let mut field_index = 0u32;
        for _ in 0..count {
            field_index = field_index.wrapping_add(self.read_uleb128()?); // field index diff
            let access_flags = self.read_uleb128()?;
            fields.push(EncodedField {
                field_index,
                access_flags,
            });
        }
        Ok(fields)
    }

    fn read_methods(&mut self, count: u32) -> Result<Vec<EncodedMethod>> {
        let mut methods = Vec::new();
        let mut method_index = 0u32;
        for _ in 0..count {
            method_index = method_index.wrapping_add(self.read_uleb128()?); // method index diff
            let access_flags = self.read_uleb128()?;
            let code_off = self.read_uleb128()?;
            methods.push(EncodedMethod {
                method_index,
                access_flags,
                code_off,
            });
        }
        Ok(methods)
    }

    pub fn read_code(&mut self) -> Result<Code> {
        let registers_size = self.read_u16()?;
        let ins_size = self.read_u16()?;
        let outs_size = self.read_u16()?;
        let tries_size = self.read_u16()?;
        let debug_info_off = self.read_u32()?;
        let instructions_size = self.read_u32()?;
        let instructions = self.read_u16_array(instructions_size as usize)?;
        let mut tries = Vec::with_capacity(tries_size as usize);
        let mut catch_handlers = Vec::new();
        if tries_size > 0 {
            if instructions.len() % 2 == 1 {
                self.read_u16()?; // padding
            }
            for _ in 0..tries_size {
                tries.push(Try {
                    start_address: self.read_u32()?,
                    instruction_count: self.read_u16()?,
                    handler_off: self.read_u16()?,
                });
            }
            let list_start = self.position;
            let handlers_size = self.read_uleb128()?;
            for _ in 0..handlers_size {
                let offset = (self.position - list_start) as u32;
                catch_handlers.push(self.read_catch_handler(offset)?);
            }
        }
        Ok(Code {
            registers_size,
            ins_size,
            outs_size,
            debug_info_off,
            instructions,
            tries,
            catch_handlers,
        })
    }

    fn read_catch_handler(&mut self, offset: u32) -> Result<CatchHandler> {
        let size = self.read_sleb128()?;
        let count = size.unsigned_abs();
        let mut type_indexes = Vec::new();
        let mut addresses = Vec::new();
        for _ in 0..count {
            type_indexes.push(self.read_uleb128()?);
            addresses.push(self.read_uleb128()?);
        }
        let catch_all_address = if size <= 0 {
            Some(self.read_uleb128()?)
        } else {
            None
        };
        Ok(CatchHandler {
            offset,
            type_indexes,
            addresses,
            catch_all_address,
        })
    }
}

/// One output section, backed by its own buffer until the image is assembled.
pub struct SectionWriter {
    name: &'static str,
    base: u32,
    limit: u32,
    data: Vec<u8>,
}

impl SectionWriter {
    /// Creates a section starting at `base` that may hold up to `max_byte_count`
    /// bytes. The limit is rounded up so the next section starts 4-byte aligned.
    pub fn new(name: &'static str, base: u32, max_byte_count: u32) -> Self {
        let limit = four_byte_align(base + max_byte_count);
        Self {
            name,
            base,
            limit,
            data: Vec::with_capacity((limit - base) as usize),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Absolute file offset of the next byte written.
    pub fn position(&self) -> u32 {
        self.base + self.data.len() as u32
    }

    /// Bytes left before the budget is exhausted.
    pub fn remaining(&self) -> u32 {
        self.limit - self.position()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn ensure_capacity(&self, size: usize) -> Result<()> {
        if self.data.len() + size > (self.limit - self.base) as usize {
            return Err(Error::CapacityOverrun {
                section: self.name,
                limit: self.limit,
                requested: size,
            });
        }
        Ok(())
    }

    pub fn assert_four_byte_aligned(&self) -> Result<()> {
        if self.position() & 3 != 0 {
            return Err(Error::Misaligned {
                section: self.name,
                position: self.position(),
            });
        }
        Ok(())
    }

    /// Writes zeros until the position is a multiple of 4.
    pub fn align_to_four_bytes(&mut self) -> Result<()> {
        let padding = (four_byte_align(self.position()) - self.position()) as usize;
        self.ensure_capacity(padding)?;
        self.data.resize(self.data.len() + padding, 0);
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_capacity(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u16_array(&mut self, values: &[u16]) -> Result<()> {
        self.ensure_capacity(values.len() * 2)?;
        for value in values {
            self.data.extend_from_slice(&value.to_le_bytes());
        }
        Ok(())
    }

    pub fn write_uleb128(&mut self, value: u32) -> Result<()> {
        let mut bytes = Vec::with_capacity(5);
        leb128::write_unsigned(&mut bytes, value);
        self.write_bytes(&bytes)
    }

    pub fn write_string_data(&mut self, value: &DexString) -> Result<()> {
        let mut bytes = Vec::with_capacity(value.units.len() + 6);
        leb128::write_unsigned(&mut bytes, value.units.len() as u32);
        mutf8::encode(&value.units, &mut bytes);
        bytes.push(0);
        self.write_bytes(&bytes)
    }

    pub fn write_type_list(&mut self, value: &TypeList) -> Result<()> {
        self.assert_four_byte_aligned()?;
        self.write_u32(value.types.len() as u32)?;
        self.write_u16_array(&value.types)?;
        self.align_to_four_bytes()
    }

    pub fn write_proto_id(&mut self, value: &ProtoId) -> Result<()> {
        self.write_u32(value.shorty_index)?;
        self.write_u32(value.return_type_index)?;
        self.write_u32(value.parameters_off)
    }

    pub fn write_field_id(&mut self, value: &FieldId) -> Result<()> {
        self.write_u16(value.declaring_class_index)?;
        self.write_u16(value.type_index)?;
        self.write_u32(value.name_index)
    }

    pub fn write_method_id(&mut self, value: &MethodId) -> Result<()> {
        self.write_u16(value.declaring_class_index)?;
        self.write_u16(value.proto_index)?;
        self.write_u32(value.name_index)
    }

    pub fn write_class_def(&mut self, value: &ClassDef) -> Result<()> {
        self.assert_four_byte_aligned()?;
        for word in [
            value.type_index,
            value.access_flags,
            value.supertype_index,
            value.interfaces_off,
            value.source_file_index,
            value.annotations_off,
            value.class_data_off,
            value.static_values_off,
        ] {
            self.write_u32(word)?;
        }
        Ok(())
    }

    pub fn write_annotation(&mut self, value: &Annotation) -> Result<()> {
        let mut bytes = vec![value.visibility];
        leb128::write_unsigned(&mut bytes, value.type_index);
        leb128::write_unsigned(&mut bytes, value.elements.len() as u32);
        for element in &value.elements {
            leb128::write_unsigned(&mut bytes, element.name_index);
            bytes.extend_from_slice(element.value.as_bytes());
        }
        self.write_bytes(&bytes)
    }
}
