use axum_extra::extract::cookie::{ Cookie, CookieJar, SameSite };
use hmac::{ Hmac, Mac };
use hmac::digest::InvalidLength;
use rand_core::{ OsRng, RngCore };
use sha2::Sha256;

pub const SESSION_COOKIE: &str = "session";
const TOKEN_BYTES: usize = 16;

type HmacSha256 = Hmac<Sha256>;

/// Issues opaque session tokens and signs them for the client-side cookie.
#[derive(Clone)]
pub struct SessionSigner {
    mac: HmacSha256,
    secure: bool,
}

impl SessionSigner {
    pub fn new(secret: &[u8]) -> Result<Self, InvalidLength> {
        Ok(Self { mac: HmacSha256::new_from_slice(secret)?, secure: false })
    }

    /// Marks issued cookies `Secure`, for servers that only speak HTTPS.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Signer keyed with 32 random bytes. Cookies do not survive a restart.
    pub fn random() -> Result<Self, InvalidLength> {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self::new(&secret)
    }

    pub fn issue(&self) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Cookie value in the form `token.signature`.
    pub fn sign(&self, token: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(token.as_bytes());
        format!("{}.{}", token, hex::encode(mac.finalize().into_bytes()))
    }

    /// Returns the token when the signature matches.
    pub fn verify(&self, value: &str) -> Option<String> {
        let (token, sig) = value.split_once('.')?;
        if token.len() != TOKEN_BYTES * 2 || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let sig = hex::decode(sig).ok()?;
        let mut mac = self.mac.clone();
        mac.update(token.as_bytes());
        mac.verify_slice(&sig).ok()?;
        Some(token.to_string())
    }

    pub fn session_from_jar(&self, jar: &CookieJar) -> Option<String> {
        jar.get(SESSION_COOKIE).and_then(|c| self.verify(c.value()))
    }

    pub fn cookie(&self, token: &str) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, self.sign(token)))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .build()
    }
}
