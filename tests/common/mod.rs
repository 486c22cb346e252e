//! Shared builders for compiling small programs in tests.
#![allow(dead_code)]

use bumpalo::Bump;
use ic10c::codegen::{compile_class, CompileOptions};
use ic10c::core::{CompilationSession, CompileError, CompileResult};
use ic10c::sbil::{
    ClassDef, CompileHint, FieldDef, FieldTag, MetadataTables, MethodDef, MethodSig, MethodTarget,
    TypeRef,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn device_interface(type_name: &str, slot_count: u32) -> TypeRef {
    TypeRef::DeviceInterface {
        type_name: type_name.to_string(),
        slot_count,
    }
}

pub fn device_field(name: &str, pin: &str, index: u8, type_name: &str, slots: u32) -> FieldDef {
    FieldDef {
        name: name.to_string(),
        ty: device_interface(type_name, slots),
        tag: Some(FieldTag::Device {
            pin: pin.to_string(),
            index,
        }),
    }
}

pub fn multicast_field(name: &str, type_name: &str) -> FieldDef {
    FieldDef {
        name: name.to_string(),
        ty: device_interface(type_name, 0),
        tag: Some(FieldTag::Multicast),
    }
}

pub fn plain_field(name: &str) -> FieldDef {
    FieldDef {
        name: name.to_string(),
        ty: TypeRef::Number,
        tag: None,
    }
}

pub fn method(
    name: &str,
    params: Vec<TypeRef>,
    locals: Vec<TypeRef>,
    returns: TypeRef,
    body: Vec<u8>,
) -> MethodDef {
    MethodDef {
        name: name.to_string(),
        is_public: true,
        params,
        locals,
        returns,
        body,
        hint: None,
    }
}

pub fn hinted_method(
    name: &str,
    params: Vec<TypeRef>,
    returns: TypeRef,
    hint: CompileHint,
) -> MethodDef {
    MethodDef {
        name: name.to_string(),
        is_public: true,
        params,
        locals: vec![],
        returns,
        // hinted methods substitute at the call site; the body is
        // only compiled if the hint does not apply
        body: vec![0x62],
        hint: Some(hint),
    }
}

pub fn getter(type_name: &str, property: &str) -> MethodSig {
    MethodSig {
        target: MethodTarget::Device {
            type_name: type_name.to_string(),
            method: format!("get_{property}"),
        },
        param_count: 0,
        returns_value: true,
    }
}

pub fn setter(type_name: &str, property: &str) -> MethodSig {
    MethodSig {
        target: MethodTarget::Device {
            type_name: type_name.to_string(),
            method: format!("set_{property}"),
        },
        param_count: 1,
        returns_value: false,
    }
}

pub fn device_method(type_name: &str, name: &str, params: usize, returns: bool) -> MethodSig {
    MethodSig {
        target: MethodTarget::Device {
            type_name: type_name.to_string(),
            method: name.to_string(),
        },
        param_count: params,
        returns_value: returns,
    }
}

pub fn runtime(name: &str, params: usize, returns: bool) -> MethodSig {
    MethodSig {
        target: MethodTarget::Runtime {
            name: name.to_string(),
            type_arg: None,
        },
        param_count: params,
        returns_value: returns,
    }
}

pub fn math(name: &str, params: usize) -> MethodSig {
    MethodSig {
        target: MethodTarget::Math {
            name: name.to_string(),
        },
        param_count: params,
        returns_value: true,
    }
}

pub fn program_method(name: &str, params: usize, returns: bool) -> MethodSig {
    MethodSig {
        target: MethodTarget::Program {
            method: name.to_string(),
        },
        param_count: params,
        returns_value: returns,
    }
}

pub fn program_class(fields: Vec<FieldDef>, methods: Vec<MethodDef>) -> ClassDef {
    ClassDef {
        name: "Controller".to_string(),
        is_program: true,
        fields,
        methods,
    }
}

pub fn compile_with(
    class: &ClassDef,
    meta: &MetadataTables,
    optimise: bool,
) -> CompileResult<String> {
    init_logging();
    let options = CompileOptions {
        optimise,
        comments: false,
    };
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    compile_class(&session, class, meta, &options)
}

/// Compile without the optimiser, so tests see the core emission.
pub fn compile_core(class: &ClassDef, meta: &MetadataTables) -> String {
    compile_with(class, meta, false).expect("compiles")
}

pub fn compile_err(class: &ClassDef, meta: &MetadataTables) -> CompileError {
    compile_with(class, meta, false).expect_err("expected a compile failure")
}
