use enumset::EnumSetType;
use rsshd::packet::userauth;

/// Authentication methods supported by the [`Auth`](crate::Auth) handler.
#[derive(Debug, EnumSetType)]
pub enum Method {
    /// The SSH `none` authentication method, only used to query the allowed methods.
    None,

    /// The SSH `publickey` authentication method, including certificates.
    Publickey,

    /// The SSH `password` authentication method.
    Password,
}

impl Method {
    /// The method name, as sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Publickey => "publickey",
            Self::Password => "password",
        }
    }

    pub(crate) fn of(method: &userauth::Method) -> Option<Self> {
        match method {
            userauth::Method::None => Some(Self::None),
            userauth::Method::Publickey { .. } => Some(Self::Publickey),
            userauth::Method::Password { .. } => Some(Self::Password),
            userauth::Method::Other(_) => None,
        }
    }
}
