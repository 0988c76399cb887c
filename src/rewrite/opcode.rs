use crate::jvm::class_file::HandleKind;
use crate::jvm::code::InvokeType;

/// Member of the opcode enum, as passed to `invoke` or to a handle constructor
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpcodeTag {
    Invoke(InvokeType),
    Handle(HandleKind),
}

impl OpcodeTag {
    /// Interpret an enum member name
    ///
    /// Matching ignores case and underscores, so `H_INVOKE_STATIC`, `H_INVOKESTATIC`, and
    /// `hInvokeStatic` are all the same member.
    pub fn from_member(member: &str) -> Option<OpcodeTag> {
        let normalized: String = member
            .chars()
            .filter(|c| *c != '_')
            .map(|c| c.to_ascii_uppercase())
            .collect();

        let tag = match normalized.as_str() {
            "INVOKEVIRTUAL" | "VIRTUAL" => OpcodeTag::Invoke(InvokeType::Virtual),
            "INVOKESPECIAL" | "SPECIAL" => OpcodeTag::Invoke(InvokeType::Special),
            "INVOKESTATIC" | "STATIC" => OpcodeTag::Invoke(InvokeType::Static),
            "INVOKEINTERFACE" | "INTERFACE" => OpcodeTag::Invoke(InvokeType::Interface),

            "HGETFIELD" => OpcodeTag::Handle(HandleKind::GetField),
            "HGETSTATIC" => OpcodeTag::Handle(HandleKind::GetStatic),
            "HPUTFIELD" => OpcodeTag::Handle(HandleKind::PutField),
            "HPUTSTATIC" => OpcodeTag::Handle(HandleKind::PutStatic),
            "HINVOKEVIRTUAL" => OpcodeTag::Handle(HandleKind::InvokeVirtual),
            "HINVOKESTATIC" => OpcodeTag::Handle(HandleKind::InvokeStatic),
            "HINVOKESPECIAL" => OpcodeTag::Handle(HandleKind::InvokeSpecial),
            "HNEWINVOKESPECIAL" => OpcodeTag::Handle(HandleKind::NewInvokeSpecial),
            "HINVOKEINTERFACE" => OpcodeTag::Handle(HandleKind::InvokeInterface),
            _ => return None,
        };
        Some(tag)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn spellings() {
        assert_eq!(
            OpcodeTag::from_member("VIRTUAL"),
            Some(OpcodeTag::Invoke(InvokeType::Virtual))
        );
        assert_eq!(
            OpcodeTag::from_member("invokeinterface"),
            Some(OpcodeTag::Invoke(InvokeType::Interface))
        );
        assert_eq!(
            OpcodeTag::from_member("H_INVOKE_STATIC"),
            Some(OpcodeTag::Handle(HandleKind::InvokeStatic))
        );
        assert_eq!(
            OpcodeTag::from_member("H_NEWINVOKESPECIAL"),
            Some(OpcodeTag::Handle(HandleKind::NewInvokeSpecial))
        );
        assert_eq!(OpcodeTag::from_member("GOTO"), None);
    }
}
