use crate::{
    algorithm::{Cipher, Compress, Hmac, Negociate},
    packet::{trans::KexInit, Id},
    side::{client::Client, server::Server},
    stream::{Keys, Transport},
    Result,
};

/// The negotiated algorithms and transcript of one side of the key-exchange.
pub struct KexMeta<'k> {
    pub id: &'k Id,

    pub compress: Compress,
    pub cipher: Cipher,
    pub hmac: Hmac,

    /// The raw `SSH_MSG_KEXINIT` payload sent by this side.
    pub kexinit: &'k [u8],
}

impl<'k> KexMeta<'k> {
    /// Negotiate the algorithms for the direction in which `S` is the sender.
    pub fn new<S>(
        id: &'k Id,
        kexinit: &'k [u8],
        clientkex: &KexInit,
        serverkex: &KexInit,
    ) -> Result<Self>
    where
        Compress: Negociate<S>,
        Cipher: Negociate<S>,
        Hmac: Negociate<S>,
    {
        let cipher = <Cipher as Negociate<S>>::negociate(clientkex, serverkex)?;
        let hmac = if cipher.is_aead() {
            Hmac::None
        } else {
            <Hmac as Negociate<S>>::negociate(clientkex, serverkex)?
        };

        Ok(Self {
            id,
            compress: <Compress as Negociate<S>>::negociate(clientkex, serverkex)?,
            cipher,
            hmac,
            kexinit,
        })
    }

    pub fn client(
        id: &'k Id,
        kexinit: &'k [u8],
        clientkex: &KexInit,
        serverkex: &KexInit,
    ) -> Result<Self> {
        Self::new::<Client>(id, kexinit, clientkex, serverkex)
    }

    pub fn server(
        id: &'k Id,
        kexinit: &'k [u8],
        clientkex: &KexInit,
        serverkex: &KexInit,
    ) -> Result<Self> {
        Self::new::<Server>(id, kexinit, clientkex, serverkex)
    }

    pub fn into_transport(self, keys: Keys, encrypt: bool) -> Result<Transport> {
        let Self {
            compress,
            cipher,
            hmac,
            ..
        } = self;

        Transport::new(cipher, hmac, compress, keys, encrypt)
    }
}
