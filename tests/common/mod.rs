//! Test-only builder for small, structurally valid dex images, and a renderer that
//! describes an image's classes by name so images can be compared independent of
//! index numbering and layout.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;

use dexmerge::format::image::DexImage;
use dexmerge::format::items::ClassDef;
use dexmerge::format::{leb128, mutf8, NO_INDEX};
use dexmerge::hasher;

pub const OBJECT: &str = "Ljava/lang/Object;";

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Int(i32),
    Str(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub class: String,
    pub name: String,
    pub ty: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub class: String,
    pub name: String,
    pub ret: String,
    pub params: Vec<String>,
}

#[derive(Clone, Debug)]
pub enum Insn {
    ConstString(String),
    ConstClass(String),
    SGet(FieldRef),
    InvokeStatic(MethodRef),
    ReturnVoid,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AnnotationSpec {
    pub ty: String,
    pub value: Option<String>,
}

impl AnnotationSpec {
    pub fn new(ty: &str, value: Option<&str>) -> Self {
        Self {
            ty: ty.to_string(),
            value: value.map(str::to_string),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub name: String,
    pub ty: String,
    pub value: Option<Value>,
}

#[derive(Clone, Debug)]
pub struct MethodSpec {
    pub name: String,
    pub ret: String,
    pub params: Vec<String>,
    pub is_static: bool,
    pub code: Vec<Insn>,
    pub catch_type: Option<String>,
    pub annotation: Option<AnnotationSpec>,
    pub parameter_annotation: Option<AnnotationSpec>,
}

impl MethodSpec {
    pub fn new(name: &str, ret: &str, params: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            ret: ret.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            is_static: false,
            code: Vec::new(),
            catch_type: None,
            annotation: None,
            parameter_annotation: None,
        }
    }

    pub fn static_(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn code(mut self, code: Vec<Insn>) -> Self {
        self.code = code;
        self
    }

    pub fn catching(mut self, ty: &str) -> Self {
        self.catch_type = Some(ty.to_string());
        self
    }

    pub fn annotated(mut self, annotation: AnnotationSpec) -> Self {
        self.annotation = Some(annotation);
        self
    }

    /// Annotates the first parameter.
    pub fn parameter_annotated(mut self, annotation: AnnotationSpec) -> Self {
        assert!(!self.params.is_empty(), "{} has no parameters", self.name);
        self.parameter_annotation = Some(annotation);
        self
    }

    fn reference(&self, class: &str) -> MethodRef {
        MethodRef {
            class: class.to_string(),
            name: self.name.clone(),
            ret: self.ret.clone(),
            params: self.params.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClassSpec {
    pub name: String,
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub source_file: Option<String>,
    pub annotation: Option<AnnotationSpec>,
    pub static_fields: Vec<FieldSpec>,
    pub instance_fields: Vec<FieldSpec>,
    pub methods: Vec<MethodSpec>,
}

impl ClassSpec {
    /// A class extending `java.lang.Object`.
    pub fn new(name: &str) -> Self {
        Self::root(name).extends(OBJECT)
    }

    /// A class with no supertype.
    pub fn root(name: &str) -> Self {
        Self {
            name: name.to_string(),
            superclass: None,
            interfaces: Vec::new(),
            source_file: None,
            annotation: None,
            static_fields: Vec::new(),
            instance_fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn extends(mut self, superclass: &str) -> Self {
        self.superclass = Some(superclass.to_string());
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.interfaces.push(interface.to_string());
        self
    }

    pub fn source(mut self, source_file: &str) -> Self {
        self.source_file = Some(source_file.to_string());
        self
    }

    pub fn annotated(mut self, annotation: AnnotationSpec) -> Self {
        self.annotation = Some(annotation);
        self
    }

    pub fn static_field(mut self, name: &str, ty: &str, value: Option<Value>) -> Self {
        self.static_fields.push(FieldSpec {
            name: name.to_string(),
            ty: ty.to_string(),
            value,
        });
        self
    }

    pub fn instance_field(mut self, name: &str, ty: &str) -> Self {
        self.instance_fields.push(FieldSpec {
            name: name.to_string(),
            ty: ty.to_string(),
            value: None,
        });
        self
    }

    pub fn method(mut self, method: MethodSpec) -> Self {
        self.methods.push(method);
        self
    }

    fn has_annotations(&self) -> bool {
        self.annotation.is_some()
            || self
                .methods
                .iter()
                .any(|m| m.annotation.is_some() || m.parameter_annotation.is_some())
    }
}

pub fn field(class: &str, name: &str, ty: &str) -> FieldRef {
    FieldRef {
        class: class.to_string(),
        name: name.to_string(),
        ty: ty.to_string(),
    }
}

pub fn method(class: &str, name: &str, ret: &str, params: &[&str]) -> MethodRef {
    MethodRef {
        class: class.to_string(),
        name: name.to_string(),
        ret: ret.to_string(),
        params: params.iter().map(|p| p.to_string()).collect(),
    }
}

fn utf16(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

fn shorty_char(descriptor: &str) -> char {
    match descriptor.as_bytes()[0] {
        b'[' => 'L',
        c => c as char,
    }
}

/// Everything an image refers to, collected before anything is numbered.
#[derive(Default)]
struct Pools {
    strings: BTreeMap<Vec<u16>, String>,
    types: BTreeSet<String>,
    protos: BTreeSet<(String, Vec<String>)>,
    fields: BTreeSet<(String, String, String)>,
    methods: BTreeSet<(String, String, String, Vec<String>)>,
}

impl Pools {
    fn string(&mut self, s: &str) {
        self.strings.insert(utf16(s), s.to_string());
    }

    fn ty(&mut self, descriptor: &str) {
        self.string(descriptor);
        self.types.insert(descriptor.to_string());
    }

    fn proto(&mut self, ret: &str, params: &[String]) {
        self.ty(ret);
        params.iter().for_each(|p| self.ty(p));
        self.string(&shorty(ret, params));
        self.protos.insert((ret.to_string(), params.to_vec()));
    }

    fn field(&mut self, f: &FieldRef) {
        self.ty(&f.class);
        self.ty(&f.ty);
        self.string(&f.name);
        self.fields.insert((f.class.clone(), f.name.clone(), f.ty.clone()));
    }

    fn method(&mut self, m: &MethodRef) {
        self.ty(&m.class);
        self.string(&m.name);
        self.proto(&m.ret, &m.params);
        self.methods
            .insert((m.class.clone(), m.name.clone(), m.ret.clone(), m.params.clone()));
    }

    fn annotation(&mut self, a: &AnnotationSpec) {
        self.ty(&a.ty);
        if let Some(value) = &a.value {
            self.string("value");
            self.string(value);
        }
    }
}

fn shorty(ret: &str, params: &[String]) -> String {
    std::iter::once(ret)
        .chain(params.iter().map(String::as_str))
        .map(shorty_char)
        .collect()
}

/// Little-endian byte sink that knows the absolute offset it starts at.
struct Data {
    base: u32,
    bytes: Vec<u8>,
}

impl Data {
    fn pos(&self) -> u32 {
        self.base + self.bytes.len() as u32
    }
    fn align(&mut self) {
        while self.pos() % 4 != 0 {
            self.bytes.push(0);
        }
    }
    fn u8(&mut self, v: u8) {
        self.bytes.push(v);
    }
    fn u16(&mut self, v: u16) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }
    fn u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }
    fn uleb(&mut self, v: u32) {
        leb128::write_unsigned(&mut self.bytes, v);
    }
    fn sleb(&mut self, v: i32) {
        leb128::write_signed(&mut self.bytes, v);
    }
}

/// `encoded_value` of type `value_type` holding `v` in as few bytes as possible.
fn encode_value(out: &mut Vec<u8>, value_type: u8, v: u32) {
    let width = (4 - v.leading_zeros() / 8).max(1) as usize;
    out.push(((width as u8 - 1) << 5) | value_type);
    out.extend_from_slice(&v.to_le_bytes()[..width]);
}

const VALUE_INT: u8 = 0x04;
const VALUE_STRING: u8 = 0x17;

pub fn build(classes: &[ClassSpec]) -> Vec<u8> {
    build_with_version(classes, 35)
}

/// Builds a dex image defining `classes`, in the given order.
pub fn build_with_version(classes: &[ClassSpec], version: u32) -> Vec<u8> {
    let mut pools = Pools::default();
    for class in classes {
        pools.ty(&class.name);
        if let Some(superclass) = &class.superclass {
            pools.ty(superclass);
        }
        class.interfaces.iter().for_each(|i| pools.ty(i));
        if let Some(source_file) = &class.source_file {
            pools.string(source_file);
        }
        if let Some(annotation) = &class.annotation {
            pools.annotation(annotation);
        }
        for f in class.static_fields.iter().chain(&class.instance_fields) {
            pools.field(&field(&class.name, &f.name, &f.ty));
            if let Some(Value::Str(s)) = &f.value {
                pools.string(s);
            }
        }
        for m in &class.methods {
            pools.method(&m.reference(&class.name));
            for insn in &m.code {
                match insn {
                    Insn::ConstString(s) => pools.string(s),
                    Insn::ConstClass(t) => pools.ty(t),
                    Insn::SGet(f) => pools.field(f),
                    Insn::InvokeStatic(target) => pools.method(target),
                    Insn::ReturnVoid => {}
                }
            }
            if let Some(t) = &m.catch_type {
                pools.ty(t);
            }
            for a in m.annotation.iter().chain(&m.parameter_annotation) {
                pools.annotation(a);
            }
        }
    }

    // Number everything in the order the format requires.
    let strings: Vec<String> = pools.strings.values().cloned().collect();
    let string_index: HashMap<&str, u32> =
        strings.iter().enumerate().map(|(i, s)| (s.as_str(), i as u32)).collect();
    let mut types: Vec<String> = pools.types.iter().cloned().collect();
    types.sort_by_key(|t| utf16(t));
    let type_index: HashMap<&str, u16> =
        types.iter().enumerate().map(|(i, t)| (t.as_str(), i as u16)).collect();
    let type_list = |list: &[String]| -> Vec<u16> { list.iter().map(|t| type_index[t.as_str()]).collect() };

    let mut protos: Vec<(u16, Vec<u16>, u32)> = pools
        .protos
        .iter()
        .map(|(ret, params)| (type_index[ret.as_str()], type_list(params), string_index[shorty(ret, params).as_str()]))
        .collect();
    protos.sort();
    let proto_index = |ret: &str, params: &[String]| -> u16 {
        let key = (type_index[ret], type_list(params));
        protos.iter().position(|(r, p, _)| (*r, p.clone()) == key).unwrap() as u16
    };

    let mut fields: Vec<(u16, u32, u16)> = pools
        .fields
        .iter()
        .map(|(c, n, t)| (type_index[c.as_str()], string_index[n.as_str()], type_index[t.as_str()]))
        .collect();
    fields.sort();
    let field_index = |f: &FieldRef| -> u32 {
        let key = (type_index[f.class.as_str()], string_index[f.name.as_str()], type_index[f.ty.as_str()]);
        fields.iter().position(|x| *x == key).unwrap() as u32
    };

    let mut methods: Vec<(u16, u32, u16)> = pools
        .methods
        .iter()
        .map(|(c, n, r, p)| (type_index[c.as_str()], string_index[n.as_str()], proto_index(r, p)))
        .collect();
    methods.sort();
    let method_index = |m: &MethodRef| -> u32 {
        let key = (type_index[m.class.as_str()], string_index[m.name.as_str()], proto_index(&m.ret, &m.params));
        methods.iter().position(|x| *x == key).unwrap() as u32
    };

    let mut type_lists: BTreeSet<Vec<u16>> = protos.iter().map(|(_, p, _)| p.clone()).collect();
    type_lists.extend(classes.iter().map(|c| type_list(&c.interfaces)));
    type_lists.remove(&Vec::new());

    let ids_size = 4 * strings.len() + 4 * types.len() + 12 * protos.len() + 8 * fields.len() + 8 * methods.len()
        + 32 * classes.len();
    let string_ids_off = 0x70u32;
    let type_ids_off = string_ids_off + 4 * strings.len() as u32;
    let proto_ids_off = type_ids_off + 4 * types.len() as u32;
    let field_ids_off = proto_ids_off + 12 * protos.len() as u32;
    let method_ids_off = field_ids_off + 8 * fields.len() as u32;
    let class_defs_off = method_ids_off + 8 * methods.len() as u32;
    let data_off = 0x70 + ids_size as u32;
    let mut data = Data {
        base: data_off,
        bytes: Vec::new(),
    };

    let string_data_off = data.pos();
    let mut string_offsets = Vec::new();
    for s in &strings {
        string_offsets.push(data.pos());
        let units = utf16(s);
        data.uleb(units.len() as u32);
        mutf8::encode(&units, &mut data.bytes);
        data.u8(0);
    }

    data.align();
    let type_lists_off = data.pos();
    let mut type_list_offsets = HashMap::new();
    for list in &type_lists {
        data.align();
        type_list_offsets.insert(list.clone(), data.pos());
        data.u32(list.len() as u32);
        list.iter().for_each(|&t| data.u16(t));
    }
    let interfaces_off = |class: &ClassSpec| -> u32 {
        let list = type_list(&class.interfaces);
        if list.is_empty() {
            0
        } else {
            type_list_offsets[&list]
        }
    };

    let annotations_off = data.pos();
    let mut annotation_specs: BTreeSet<&AnnotationSpec> = BTreeSet::new();
    for class in classes {
        annotation_specs.extend(class.annotation.iter());
        for m in &class.methods {
            annotation_specs.extend(m.annotation.iter().chain(&m.parameter_annotation));
        }
    }
    let mut annotation_offsets = HashMap::new();
    for a in &annotation_specs {
        annotation_offsets.insert((*a).clone(), data.pos());
        data.u8(1); // VISIBILITY_RUNTIME
        data.uleb(type_index[a.ty.as_str()] as u32);
        match &a.value {
            None => data.uleb(0),
            Some(value) => {
                data.uleb(1);
                data.uleb(string_index["value"]);
                encode_value(&mut data.bytes, VALUE_STRING, string_index[value.as_str()]);
            }
        }
    }

    // One set per annotated class, method or parameter.
    data.align();
    let annotation_sets_off = data.pos();
    let mut set_count = 0;
    let mut write_set = |data: &mut Data, a: &AnnotationSpec| -> u32 {
        data.align();
        let off = data.pos();
        data.u32(1);
        data.u32(annotation_offsets[a]);
        set_count += 1;
        off
    };
    let mut class_set = HashMap::new();
    let mut method_set = HashMap::new();
    let mut parameter_set = HashMap::new();
    for (ci, class) in classes.iter().enumerate() {
        if let Some(a) = &class.annotation {
            class_set.insert(ci, write_set(&mut data, a));
        }
        for (mi, m) in class.methods.iter().enumerate() {
            if let Some(a) = &m.annotation {
                method_set.insert((ci, mi), write_set(&mut data, a));
            }
            if let Some(a) = &m.parameter_annotation {
                parameter_set.insert((ci, mi), write_set(&mut data, a));
            }
        }
    }

    data.align();
    let ref_lists_off = data.pos();
    let mut ref_lists = HashMap::new();
    for (&(ci, mi), &set_off) in parameter_set.iter().collect::<BTreeMap<_, _>>() {
        data.align();
        ref_lists.insert((ci, mi), data.pos());
        let params = classes[ci].methods[mi].params.len();
        data.u32(params as u32);
        data.u32(set_off);
        for _ in 1..params {
            data.u32(0);
        }
    }

    data.align();
    let directories_off = data.pos();
    let mut directories = HashMap::new();
    for (ci, class) in classes.iter().enumerate() {
        if !class.has_annotations() {
            continue;
        }
        data.align();
        directories.insert(ci, data.pos());
        let mut method_entries = Vec::new();
        let mut parameter_entries = Vec::new();
        for (mi, m) in class.methods.iter().enumerate() {
            let index = method_index(&m.reference(&class.name));
            if let Some(&set_off) = method_set.get(&(ci, mi)) {
                method_entries.push((index, set_off));
            }
            if let Some(&ref_off) = ref_lists.get(&(ci, mi)) {
                parameter_entries.push((index, ref_off));
            }
        }
        method_entries.sort();
        parameter_entries.sort();
        data.u32(class_set.get(&ci).copied().unwrap_or(0));
        data.u32(0);
        data.u32(method_entries.len() as u32);
        data.u32(parameter_entries.len() as u32);
        for (index, off) in method_entries.into_iter().chain(parameter_entries) {
            data.u32(index);
            data.u32(off);
        }
    }

    data.align();
    let code_off = data.pos();
    let mut code_count = 0;
    let mut code_offsets = HashMap::new();
    for (ci, class) in classes.iter().enumerate() {
        for (mi, m) in class.methods.iter().enumerate() {
            if m.code.is_empty() {
                continue;
            }
            data.align();
            code_offsets.insert((ci, mi), data.pos());
            code_count += 1;
            let mut insns: Vec<u16> = Vec::new();
            for insn in &m.code {
                match insn {
                    Insn::ConstString(s) => insns.extend([0x001a, string_index[s.as_str()] as u16]),
                    Insn::ConstClass(t) => insns.extend([0x001c, type_index[t.as_str()]]),
                    Insn::SGet(f) => insns.extend([0x0060, field_index(f) as u16]),
                    Insn::InvokeStatic(target) => insns.extend([0x0071, method_index(target) as u16, 0]),
                    Insn::ReturnVoid => insns.push(0x000e),
                }
            }
            data.u16(1); // registers
            data.u16(0); // ins
            data.u16(0); // outs
            data.u16(m.catch_type.is_some() as u16);
            data.u32(0); // debug info
            data.u32(insns.len() as u32);
            insns.iter().for_each(|&u| data.u16(u));
            if let Some(t) = &m.catch_type {
                if insns.len() % 2 == 1 {
                    data.u16(0);
                }
                data.u32(0);
                data.u16(insns.len() as u16);
                data.u16(1); // handler after the list size
                data.uleb(1);
                data.sleb(1);
                data.uleb(type_index[t.as_str()] as u32);
                data.uleb(0);
            }
        }
    }

    let class_data_off = data.pos();
    let mut class_data_count = 0;
    let mut class_data_offsets = HashMap::new();
    for (ci, class) in classes.iter().enumerate() {
        if class.static_fields.is_empty() && class.instance_fields.is_empty() && class.methods.is_empty() {
            continue;
        }
        class_data_offsets.insert(ci, data.pos());
        class_data_count += 1;
        let sorted_fields = |list: &[FieldSpec]| -> Vec<u32> {
            let mut indices: Vec<u32> =
                list.iter().map(|f| field_index(&field(&class.name, &f.name, &f.ty))).collect();
            indices.sort();
            indices
        };
        let mut direct = Vec::new();
        let mut virtual_ = Vec::new();
        for (mi, m) in class.methods.iter().enumerate() {
            let entry = (method_index(&m.reference(&class.name)), code_offsets.get(&(ci, mi)).copied().unwrap_or(0));
            if m.is_static || m.name == "<init>" {
                direct.push((entry, 0x0009u32)); // public static
            } else {
                virtual_.push((entry, 0x0001u32)); // public
            }
        }
        direct.sort();
        virtual_.sort();

        let static_fields = sorted_fields(&class.static_fields);
        let instance_fields = sorted_fields(&class.instance_fields);
        data.uleb(static_fields.len() as u32);
        data.uleb(instance_fields.len() as u32);
        data.uleb(direct.len() as u32);
        data.uleb(virtual_.len() as u32);
        for (list, flags) in [(static_fields, 0x0009), (instance_fields, 0x0001)] {
            let mut last = 0;
            for index in list {
                data.uleb(index - last);
                data.uleb(flags);
                last = index;
            }
        }
        for list in [direct, virtual_] {
            let mut last = 0;
            for ((index, code), flags) in list {
                data.uleb(index - last);
                data.uleb(flags);
                data.uleb(code);
                last = index;
            }
        }
    }

    let encoded_arrays_off = data.pos();
    let mut static_values = HashMap::new();
    for (ci, class) in classes.iter().enumerate() {
        if class.static_fields.iter().all(|f| f.value.is_none()) {
            continue;
        }
        static_values.insert(ci, data.pos());
        let mut ordered: Vec<(u32, Option<&Value>)> = class
            .static_fields
            .iter()
            .map(|f| (field_index(&field(&class.name, &f.name, &f.ty)), f.value.as_ref()))
            .collect();
        ordered.sort_by_key(|(index, _)| *index);
        data.uleb(ordered.len() as u32);
        for (_, value) in ordered {
            match value {
                None => encode_value(&mut data.bytes, VALUE_INT, 0),
                Some(Value::Int(v)) => {
                    // full width keeps negative values sign-correct
                    data.u8((3 << 5) | VALUE_INT);
                    data.bytes.extend_from_slice(&v.to_le_bytes());
                }
                Some(Value::Str(s)) => encode_value(&mut data.bytes, VALUE_STRING, string_index[s.as_str()]),
            }
        }
    }

    data.align();
    let map_off = data.pos();
    let mut map: Vec<(u16, u32, u32)> = vec![
        (0x0000, 1, 0),
        (0x0001, strings.len() as u32, string_ids_off),
        (0x0002, types.len() as u32, type_ids_off),
        (0x0003, protos.len() as u32, proto_ids_off),
        (0x0004, fields.len() as u32, field_ids_off),
        (0x0005, methods.len() as u32, method_ids_off),
        (0x0006, classes.len() as u32, class_defs_off),
        (0x2002, strings.len() as u32, string_data_off),
        (0x1001, type_lists.len() as u32, type_lists_off),
        (0x2004, annotation_specs.len() as u32, annotations_off),
        (0x1003, set_count, annotation_sets_off),
        (0x1002, ref_lists.len() as u32, ref_lists_off),
        (0x2006, directories.len() as u32, directories_off),
        (0x2001, code_count, code_off),
        (0x2000, class_data_count, class_data_off),
        (0x2005, static_values.len() as u32, encoded_arrays_off),
        (0x1000, 1, map_off),
    ];
    map.retain(|&(_, size, _)| size > 0);
    map.sort_by_key(|&(_, _, off)| off);
    data.u32(map.len() as u32);
    for (code, size, off) in &map {
        data.u16(*code);
        data.u16(0);
        data.u32(*size);
        data.u32(*off);
    }

    // ids
    let mut ids = Data {
        base: 0x70,
        bytes: Vec::new(),
    };
    string_offsets.iter().for_each(|&off| ids.u32(off));
    types.iter().for_each(|t| ids.u32(string_index[t.as_str()]));
    for (ret, params, shorty) in &protos {
        ids.u32(*shorty);
        ids.u32(*ret as u32);
        ids.u32(if params.is_empty() { 0 } else { type_list_offsets[params] });
    }
    for (class, name, ty) in &fields {
        ids.u16(*class);
        ids.u16(*ty);
        ids.u32(*name);
    }
    for (class, name, proto) in &methods {
        ids.u16(*class);
        ids.u16(*proto);
        ids.u32(*name);
    }
    for (ci, class) in classes.iter().enumerate() {
        ids.u32(type_index[class.name.as_str()] as u32);
        ids.u32(0x0001);
        ids.u32(class.superclass.as_ref().map_or(NO_INDEX, |s| type_index[s.as_str()] as u32));
        ids.u32(interfaces_off(class));
        ids.u32(class.source_file.as_ref().map_or(NO_INDEX, |s| string_index[s.as_str()]));
        ids.u32(directories.get(&ci).copied().unwrap_or(0));
        ids.u32(class_data_offsets.get(&ci).copied().unwrap_or(0));
        ids.u32(static_values.get(&ci).copied().unwrap_or(0));
    }
    assert_eq!(ids.pos(), data_off);

    let file_size = data.pos();
    let mut header = Data {
        base: 0,
        bytes: Vec::new(),
    };
    header.bytes.extend_from_slice(format!("dex\n{:03}\0", version).as_bytes());
    header.u32(0); // checksum
    header.bytes.extend_from_slice(&[0; 20]); // signature
    header.u32(file_size);
    header.u32(0x70);
    header.u32(0x1234_5678);
    header.u32(0); // link size
    header.u32(0); // link off
    header.u32(map_off);
    for (size, off) in [
        (strings.len(), string_ids_off),
        (types.len(), type_ids_off),
        (protos.len(), proto_ids_off),
        (fields.len(), field_ids_off),
        (methods.len(), method_ids_off),
        (classes.len(), class_defs_off),
    ] {
        header.u32(size as u32);
        header.u32(if size == 0 { 0 } else { off });
    }
    header.u32(file_size - data_off);
    header.u32(data_off);
    assert_eq!(header.bytes.len(), 0x70);

    let mut image = header.bytes;
    image.extend(ids.bytes);
    image.extend(data.bytes);
    hasher::write_hashes(&mut image);
    image
}

fn decode_value(image: &DexImage<'_>, bytes: &[u8]) -> (String, usize) {
    let header = bytes[0];
    let width = (header >> 5) as usize + 1;
    let mut raw = [0u8; 4];
    raw[..width].copy_from_slice(&bytes[1..1 + width]);
    let value = u32::from_le_bytes(raw);
    let text = match header & 0x1f {
        VALUE_INT => {
            let shift = 32 - 8 * width as u32;
            format!("{}", ((value << shift) as i32) >> shift)
        }
        VALUE_STRING => format!("{:?}", string(image, value)),
        other => panic!("unexpected value type 0x{:02x}", other),
    };
    (text, 1 + width)
}

fn string(image: &DexImage<'_>, index: u32) -> String {
    image
        .string(index)
        .unwrap_or_else(|e| panic!("dangling string index {}: {}", index, e))
        .to_string()
}

fn type_name(image: &DexImage<'_>, index: u32) -> String {
    if index == NO_INDEX {
        return "none".to_string();
    }
    image
        .type_name(index)
        .unwrap_or_else(|e| panic!("dangling type index {}: {}", index, e))
        .to_string()
}

fn type_list(image: &DexImage<'_>, offset: u32) -> String {
    let list = image.read_type_list(offset).expect("type list");
    let names: Vec<String> = list.types.iter().map(|&t| type_name(image, t as u32)).collect();
    names.join(",")
}

fn proto(image: &DexImage<'_>, index: u32) -> String {
    let protos = image.proto_ids().expect("protos");
    let p = protos.get(index as usize).unwrap_or_else(|| panic!("dangling proto index {}", index));
    format!(
        "({}){} shorty {}",
        type_list(image, p.parameters_off),
        type_name(image, p.return_type_index),
        string(image, p.shorty_index)
    )
}

fn field_name(image: &DexImage<'_>, index: u32) -> String {
    let fields = image.field_ids().expect("fields");
    let f = fields.get(index as usize).unwrap_or_else(|| panic!("dangling field index {}", index));
    format!(
        "{}.{}:{}",
        type_name(image, f.declaring_class_index as u32),
        string(image, f.name_index),
        type_name(image, f.type_index as u32)
    )
}

fn method_name(image: &DexImage<'_>, index: u32) -> String {
    let methods = image.method_ids().expect("methods");
    let m = methods.get(index as usize).unwrap_or_else(|| panic!("dangling method index {}", index));
    format!(
        "{}.{}{}",
        type_name(image, m.declaring_class_index as u32),
        string(image, m.name_index),
        proto(image, m.proto_index as u32)
    )
}

fn annotation_set(image: &DexImage<'_>, offset: u32) -> String {
    if offset == 0 {
        return "-".to_string();
    }
    let mut reader = image.open(offset).expect("annotation set");
    let size = reader.read_u32().expect("set size");
    let mut out = Vec::new();
    for _ in 0..size {
        let annotation_off = reader.read_u32().expect("annotation offset");
        let annotation = image.open(annotation_off).and_then(|mut r| r.read_annotation()).expect("annotation");
        let elements: Vec<String> = annotation
            .elements
            .iter()
            .map(|e| format!("{}={}", string(image, e.name_index), decode_value(image, e.value.as_bytes()).0))
            .collect();
        out.push(format!(
            "@{}({}) visibility {}",
            type_name(image, annotation.type_index),
            elements.join(","),
            annotation.visibility
        ));
    }
    out.join(" ")
}

fn describe_annotations(image: &DexImage<'_>, offset: u32, out: &mut String) {
    if offset == 0 {
        return;
    }
    let mut reader = image.open(offset).expect("directory");
    let class_set = reader.read_u32().unwrap();
    let fields_size = reader.read_u32().unwrap();
    let methods_size = reader.read_u32().unwrap();
    let parameters_size = reader.read_u32().unwrap();
    writeln!(out, "  annotations {}", annotation_set(image, class_set)).unwrap();
    for _ in 0..fields_size {
        let (f, set) = (reader.read_u32().unwrap(), reader.read_u32().unwrap());
        writeln!(out, "  field annotations {} {}", field_name(image, f), annotation_set(image, set)).unwrap();
    }
    for _ in 0..methods_size {
        let (m, set) = (reader.read_u32().unwrap(), reader.read_u32().unwrap());
        writeln!(out, "  method annotations {} {}", method_name(image, m), annotation_set(image, set)).unwrap();
    }
    for _ in 0..parameters_size {
        let (m, ref_list) = (reader.read_u32().unwrap(), reader.read_u32().unwrap());
        let mut list = image.open(ref_list).expect("ref list");
        let size = list.read_u32().unwrap();
        let sets: Vec<String> = (0..size).map(|_| annotation_set(image, list.read_u32().unwrap())).collect();
        writeln!(out, "  parameter annotations {} [{}]", method_name(image, m), sets.join("; ")).unwrap();
    }
}

fn describe_code(image: &DexImage<'_>, code_off: u32, out: &mut String) {
    let method = dexmerge::format::items::EncodedMethod {
        method_index: 0,
        access_flags: 0,
        code_off,
    };
    let Some(code) = image.read_code(&method).expect("code") else {
        return;
    };
    assert_eq!(code.debug_info_off, 0);
    let insns = &code.instructions;
    let mut pc = 0;
    while pc < insns.len() {
        let operand = || insns[pc + 1] as u32;
        let (text, width) = match insns[pc] & 0xff {
            0x1a => (format!("const-string {:?}", string(image, operand())), 2),
            0x1c => (format!("const-class {}", type_name(image, operand())), 2),
            0x60 => (format!("sget {}", field_name(image, operand())), 2),
            0x71 => (format!("invoke-static {}", method_name(image, operand())), 3),
            0x0e => ("return-void".to_string(), 1),
            other => panic!("unexpected opcode 0x{:02x}", other),
        };
        writeln!(out, "    {}", text).unwrap();
        pc += width;
    }
    for try_item in &code.tries {
        let handler = code
            .catch_handlers
            .iter()
            .find(|h| h.offset == try_item.handler_off as u32)
            .unwrap_or_else(|| panic!("try points at missing handler {}", try_item.handler_off));
        let catches: Vec<String> = handler
            .type_indexes
            .iter()
            .zip(&handler.addresses)
            .map(|(&t, a)| format!("{}@{}", type_name(image, t), a))
            .collect();
        writeln!(
            out,
            "    try {}+{} catch {} all {:?}",
            try_item.start_address,
            try_item.instruction_count,
            catches.join(","),
            handler.catch_all_address
        )
        .unwrap();
    }
}

fn describe_class(image: &DexImage<'_>, class_def: &ClassDef) -> String {
    let mut out = String::new();
    writeln!(out, "class {} flags 0x{:x}", type_name(image, class_def.type_index), class_def.access_flags).unwrap();
    writeln!(out, "  extends {}", type_name(image, class_def.supertype_index)).unwrap();
    writeln!(out, "  implements [{}]", type_list(image, class_def.interfaces_off)).unwrap();
    let source = if class_def.source_file_index == NO_INDEX {
        "none".to_string()
    } else {
        string(image, class_def.source_file_index)
    };
    writeln!(out, "  source {}", source).unwrap();
    describe_annotations(image, class_def.annotations_off, &mut out);

    let class_data = image.read_class_data(class_def).expect("class data");
    for (kind, fields) in [("static", &class_data.static_fields), ("instance", &class_data.instance_fields)] {
        for f in fields {
            writeln!(out, "  {} field {} flags 0x{:x}", kind, field_name(image, f.field_index), f.access_flags).unwrap();
        }
    }
    for (kind, methods) in [("direct", &class_data.direct_methods), ("virtual", &class_data.virtual_methods)] {
        for m in methods {
            writeln!(out, "  {} method {} flags 0x{:x}", kind, method_name(image, m.method_index), m.access_flags)
                .unwrap();
            describe_code(image, m.code_off, &mut out);
        }
    }

    if let Some(values) = image.read_static_values(class_def).expect("static values") {
        let bytes = values.as_bytes();
        let (count, mut pos) = leb128::read_unsigned(bytes).expect("array size");
        let mut rendered = Vec::new();
        for _ in 0..count {
            let (text, len) = decode_value(image, &bytes[pos..]);
            rendered.push(text);
            pos += len;
        }
        writeln!(out, "  static values [{}]", rendered.join(", ")).unwrap();
    }
    out
}

/// Every class of `image`, by descriptor, rendered with all references resolved to
/// names. Panics on any dangling index.
pub fn describe(image: &DexImage<'_>) -> BTreeMap<String, String> {
    image
        .class_defs()
        .expect("class defs")
        .iter()
        .map(|class_def| (type_name(image, class_def.type_index), describe_class(image, class_def)))
        .collect()
}

/// Class descriptors in class def order.
pub fn class_names(image: &DexImage<'_>) -> Vec<String> {
    image
        .class_defs()
        .expect("class defs")
        .iter()
        .map(|class_def| type_name(image, class_def.type_index))
        .collect()
}

/// A small but feature-complete app: a class hierarchy, an interface, fields with
/// static values, code touching every operand kind, try/catch and annotations.
pub fn sample_app() -> Vec<ClassSpec> {
    vec![
        ClassSpec::new("Lcom/example/Greeter;")
            .source("Greeter.java")
            .annotated(AnnotationSpec::new("Lcom/example/Keep;", Some("greeter")))
            .static_field("GREETING", "Ljava/lang/String;", Some(Value::Str("hello".to_string())))
            .static_field("COUNT", "I", Some(Value::Int(-3)))
            .instance_field("name", "Ljava/lang/String;")
            .method(
                MethodSpec::new("greet", "V", &["Ljava/lang/String;"])
                    .static_()
                    .code(vec![
                        Insn::ConstString("hello".to_string()),
                        Insn::SGet(field("Lcom/example/Greeter;", "COUNT", "I")),
                        Insn::InvokeStatic(method("Lcom/example/Util;", "log", "V", &[])),
                        Insn::ReturnVoid,
                    ])
                    .catching("Ljava/lang/RuntimeException;")
                    .annotated(AnnotationSpec::new("Lcom/example/Trace;", None))
                    .parameter_annotated(AnnotationSpec::new("Lcom/example/NonNull;", None)),
            )
            .method(
                MethodSpec::new("toString", "Ljava/lang/String;", &[])
                    .code(vec![Insn::ConstClass("Lcom/example/Greeter;".to_string()), Insn::ReturnVoid]),
            ),
        ClassSpec::new("Lcom/example/Util;")
            .source("Util.java")
            .method(MethodSpec::new("log", "V", &[]).static_().code(vec![Insn::ReturnVoid])),
        ClassSpec::root("Lcom/example/Named;").implements("Lcom/example/Marker;"),
        ClassSpec::new("Lcom/example/Loud;")
            .extends("Lcom/example/Greeter;")
            .implements("Lcom/example/Named;")
            .method(
                MethodSpec::new("greet", "V", &["Ljava/lang/String;"])
                    .code(vec![Insn::ConstString("HELLO".to_string()), Insn::ReturnVoid]),
            ),
    ]
}
