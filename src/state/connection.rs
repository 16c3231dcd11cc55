//! Connection startup and authentication state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::opts::{ChannelBindingMode, Opts, SslMode};
use crate::protocol::backend::{
    AuthenticationMessage, BackendKeyData, ErrorResponse, NegotiateProtocolVersion,
    ParameterStatus, RawMessage, ReadyForQuery, msg_type,
};
use crate::protocol::frontend::auth::{ChannelBinding, SCRAM_SHA_256_PLUS, ScramClient, md5_password};
use crate::protocol::frontend::{
    write_password, write_sasl_initial_response, write_sasl_response, write_ssl_request,
    write_startup,
};
use crate::protocol::types::TransactionStatus;

use super::action::Action;
use super::{StateMachine, async_action, unexpected};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingSslResponse,
    TlsHandshake,
    WaitingAuth,
    SaslInProgress,
    WaitingAuthResult,
    WaitingReady,
    Finished,
}

/// Drives SSL negotiation, authentication and the startup parameter
/// exchange up to the first ReadyForQuery.
pub struct ConnectionStateMachine {
    state: State,
    user: String,
    password: Option<String>,
    startup_params: Vec<(String, String)>,
    ssl_mode: SslMode,
    channel_binding: ChannelBindingMode,
    ssl_response: Option<u8>,
    tls_cert_hash: Option<Vec<u8>>,
    scram_client: Option<ScramClient>,
    backend_key: Option<BackendKeyData>,
    server_params: Vec<(String, String)>,
    ready_status: Option<TransactionStatus>,
}

impl ConnectionStateMachine {
    pub fn new(opts: &Opts) -> Self {
        Self {
            state: State::Initial,
            user: opts.user.clone(),
            password: opts.password.clone(),
            startup_params: opts
                .startup_params()
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
            ssl_mode: opts.ssl_mode,
            channel_binding: opts.channel_binding,
            ssl_response: None,
            tls_cert_hash: None,
            scram_client: None,
            backend_key: None,
            server_params: Vec::new(),
            ready_status: None,
        }
    }

    /// Record the byte the server sent in answer to SSLRequest.
    pub fn set_ssl_response(&mut self, byte: u8) {
        self.ssl_response = Some(byte);
    }

    /// Called after the TLS handshake. `cert_hash` is the
    /// `tls-server-end-point` hash of the server certificate, when known.
    pub fn set_tls_established(&mut self, cert_hash: Option<Vec<u8>>) {
        self.tls_cert_hash = cert_hash;
    }

    /// Cancellation key sent by the server.
    pub fn backend_key(&self) -> Option<BackendKeyData> {
        self.backend_key
    }

    /// ParameterStatus values received during startup.
    pub fn take_server_params(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.server_params)
    }

    fn write_startup_message(&self, buffer_set: &mut BufferSet) {
        let params: Vec<(&str, &str)> = self
            .startup_params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        buffer_set.write_buffer.clear();
        write_startup(&mut buffer_set.write_buffer, &params);
        tracing::debug!(user = %self.user, tls = self.tls_cert_hash.is_some(), "sending startup message");
    }

    fn password(&self) -> Result<&str> {
        self.password
            .as_deref()
            .ok_or_else(|| Error::Auth("password required but not provided".into()))
    }

    fn refuse_without_binding(&self, method: &str) -> Result<()> {
        if self.channel_binding == ChannelBindingMode::Require {
            return Err(Error::Auth(format!(
                "channel binding required, but server requested {} authentication",
                method
            )));
        }
        Ok(())
    }

    fn handle_ssl_response(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.ssl_response.take() {
            Some(b'S') => {
                self.state = State::TlsHandshake;
                Ok(Action::TlsHandshake)
            }
            Some(b'N') => {
                if self.ssl_mode.requires_tls() {
                    return Err(Error::Auth(format!(
                        "sslmode {:?} requires TLS but the server does not support it",
                        self.ssl_mode
                    )));
                }
                tracing::debug!("server refused TLS, continuing in plaintext");
                self.write_startup_message(buffer_set);
                self.state = State::WaitingAuth;
                Ok(Action::WriteAndReadMessage)
            }
            Some(other) => Err(Error::Protocol(format!(
                "unexpected SSL response byte: {}",
                other
            ))),
            None => Err(Error::Protocol("SSL response byte not provided".into())),
        }
    }

    fn start_sasl(&mut self, mechanisms: &[&str], buffer_set: &mut BufferSet) -> Result<Action> {
        let offers_plus = mechanisms.contains(&SCRAM_SHA_256_PLUS);
        let binding = match (&self.tls_cert_hash, self.channel_binding) {
            (_, ChannelBindingMode::Disable) | (None, _) => ChannelBinding::Unsupported,
            (Some(hash), _) if offers_plus => ChannelBinding::TlsServerEndPoint(hash.clone()),
            (Some(_), _) => ChannelBinding::NotOfferedByServer,
        };
        if self.channel_binding == ChannelBindingMode::Require
            && !matches!(binding, ChannelBinding::TlsServerEndPoint(_))
        {
            return Err(Error::Auth(
                "channel binding required, but SCRAM-SHA-256-PLUS is not available".into(),
            ));
        }
        if !mechanisms.contains(&binding.mechanism()) {
            return Err(Error::Auth(format!(
                "no supported SASL mechanism; server offers {:?}",
                mechanisms
            )));
        }

        let scram = ScramClient::new_with_channel_binding(self.password()?, binding);
        tracing::debug!(mechanism = scram.mechanism(), "starting SASL authentication");
        buffer_set.write_buffer.clear();
        write_sasl_initial_response(
            &mut buffer_set.write_buffer,
            scram.mechanism(),
            scram.client_first_message().as_bytes(),
        );
        self.scram_client = Some(scram);
        self.state = State::SaslInProgress;
        Ok(Action::WriteAndReadMessage)
    }

    fn handle_auth(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if buffer_set.type_byte != msg_type::AUTHENTICATION {
            return Err(unexpected(buffer_set.type_byte, "while waiting for authentication"));
        }
        // The auth message borrows the read buffer; the reply goes to the
        // write buffer, so copy out what is needed first.
        let read_buffer = std::mem::take(&mut buffer_set.read_buffer);
        let result = self.handle_auth_message(&read_buffer, buffer_set);
        buffer_set.read_buffer = read_buffer;
        result
    }

    fn handle_auth_message(&mut self, payload: &[u8], buffer_set: &mut BufferSet) -> Result<Action> {
        let auth = AuthenticationMessage::parse(payload)?;
        match (self.state, auth) {
            (State::WaitingAuth | State::WaitingAuthResult, AuthenticationMessage::Ok) => {
                if self.state == State::WaitingAuth {
                    self.refuse_without_binding("trust")?;
                }
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            (State::WaitingAuth, AuthenticationMessage::CleartextPassword) => {
                self.refuse_without_binding("cleartext password")?;
                buffer_set.write_buffer.clear();
                write_password(&mut buffer_set.write_buffer, self.password()?);
                self.state = State::WaitingAuthResult;
                Ok(Action::WriteAndReadMessage)
            }
            (State::WaitingAuth, AuthenticationMessage::Md5Password { salt }) => {
                self.refuse_without_binding("MD5 password")?;
                let hashed = md5_password(&self.user, self.password()?, &salt);
                buffer_set.write_buffer.clear();
                write_password(&mut buffer_set.write_buffer, &hashed);
                self.state = State::WaitingAuthResult;
                Ok(Action::WriteAndReadMessage)
            }
            (State::WaitingAuth, AuthenticationMessage::Sasl { mechanisms }) => {
                self.start_sasl(&mechanisms, buffer_set)
            }
            (State::SaslInProgress, AuthenticationMessage::SaslContinue { data }) => {
                let scram = self
                    .scram_client
                    .as_mut()
                    .ok_or_else(|| Error::Protocol("SCRAM client not initialized".into()))?;
                let server_first = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("invalid server-first-message: {}", e)))?;
                let client_final = scram.process_server_first(server_first).map_err(Error::Auth)?;
                buffer_set.write_buffer.clear();
                write_sasl_response(&mut buffer_set.write_buffer, client_final.as_bytes());
                Ok(Action::WriteAndReadMessage)
            }
            (State::SaslInProgress, AuthenticationMessage::SaslFinal { data }) => {
                let scram = self
                    .scram_client
                    .take()
                    .ok_or_else(|| Error::Protocol("SCRAM client not initialized".into()))?;
                let server_final = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("invalid server-final-message: {}", e)))?;
                scram.verify_server_final(server_final).map_err(Error::Auth)?;
                self.state = State::WaitingAuthResult;
                Ok(Action::ReadMessage)
            }
            (_, auth) => Err(Error::Auth(format!(
                "unsupported authentication request: {:?}",
                auth
            ))),
        }
    }

    fn handle_startup_message(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let payload = &buffer_set.read_buffer;
        match buffer_set.type_byte {
            msg_type::BACKEND_KEY_DATA => {
                self.backend_key = Some(*BackendKeyData::parse(payload)?);
                Ok(Action::ReadMessage)
            }
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(payload)?;
                self.server_params
                    .push((param.name.to_string(), param.value.to_string()));
                Ok(Action::ReadMessage)
            }
            msg_type::NEGOTIATE_PROTOCOL_VERSION => {
                let negotiate = NegotiateProtocolVersion::parse(payload)?;
                tracing::debug!(?negotiate, "server negotiated protocol version");
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(payload)?;
                self.ready_status = Some(ready.transaction_status().unwrap_or_default());
                self.state = State::Finished;
                tracing::debug!(params = self.server_params.len(), "startup complete");
                Ok(Action::Finished)
            }
            other => Err(unexpected(other, "during startup")),
        }
    }
}

impl StateMachine for ConnectionStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.state {
            State::Initial => {
                if self.ssl_mode == SslMode::Disable {
                    self.write_startup_message(buffer_set);
                    self.state = State::WaitingAuth;
                    return Ok(Action::WriteAndReadMessage);
                }
                buffer_set.write_buffer.clear();
                write_ssl_request(&mut buffer_set.write_buffer);
                self.state = State::WaitingSslResponse;
                return Ok(Action::WriteAndReadByte);
            }
            State::WaitingSslResponse => return self.handle_ssl_response(buffer_set),
            State::TlsHandshake => {
                self.write_startup_message(buffer_set);
                self.state = State::WaitingAuth;
                return Ok(Action::WriteAndReadMessage);
            }
            State::Finished => return Ok(Action::Finished),
            _ => {}
        }

        let type_byte = buffer_set.type_byte;
        if type_byte == msg_type::ERROR_RESPONSE {
            return Err(ErrorResponse::parse(&buffer_set.read_buffer)?.into_error());
        }
        // Startup ParameterStatus messages are collected rather than
        // reported as changes.
        if type_byte != msg_type::PARAMETER_STATUS && RawMessage::is_async_type(type_byte) {
            return async_action(buffer_set);
        }

        match self.state {
            State::WaitingAuth | State::SaslInProgress | State::WaitingAuthResult => {
                self.handle_auth(buffer_set)
            }
            State::WaitingReady => self.handle_startup_message(buffer_set),
            state => Err(Error::Protocol(format!("unexpected message in state {:?}", state))),
        }
    }

    fn ready_status(&self) -> Option<TransactionStatus> {
        self.ready_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::{auth, backend_key, error, feed, frontend_tags, parameter_status, ready};

    fn opts(ssl_mode: SslMode) -> Opts {
        Opts {
            user: "alice".into(),
            password: Some("secret".into()),
            ssl_mode,
            ..Opts::default()
        }
    }

    fn step_with(
        sm: &mut ConnectionStateMachine,
        bs: &mut BufferSet,
        msg: (u8, Vec<u8>),
    ) -> Result<Action> {
        feed(bs, msg.0, &msg.1);
        sm.step(bs)
    }

    #[test]
    fn test_cleartext_login() {
        let mut bs = BufferSet::new();
        let mut sm = ConnectionStateMachine::new(&opts(SslMode::Disable));
        assert!(matches!(sm.step(&mut bs).unwrap(), Action::WriteAndReadMessage));
        // startup message carries no type byte, so just check it is non-empty
        assert!(!bs.write_buffer.is_empty());

        assert!(matches!(
            step_with(&mut sm, &mut bs, auth(3, &[])).unwrap(),
            Action::WriteAndReadMessage
        ));
        assert_eq!(frontend_tags(&bs.write_buffer), vec![b'p']);

        assert!(matches!(step_with(&mut sm, &mut bs, auth(0, &[])).unwrap(), Action::ReadMessage));
        step_with(&mut sm, &mut bs, backend_key(42, 7)).unwrap();
        step_with(&mut sm, &mut bs, parameter_status("server_version", "16.2")).unwrap();
        assert!(matches!(step_with(&mut sm, &mut bs, ready(b'I')).unwrap(), Action::Finished));

        assert_eq!(sm.ready_status(), Some(TransactionStatus::Idle));
        let key = sm.backend_key().unwrap();
        assert_eq!((key.process_id(), key.secret()), (42, 7));
        assert_eq!(
            sm.take_server_params(),
            vec![("server_version".to_string(), "16.2".to_string())]
        );
    }

    #[test]
    fn test_md5_password_hashing() {
        let mut bs = BufferSet::new();
        let mut sm = ConnectionStateMachine::new(&opts(SslMode::Disable));
        sm.step(&mut bs).unwrap();
        step_with(&mut sm, &mut bs, auth(5, &[1, 2, 3, 4])).unwrap();
        let expected = md5_password("alice", "secret", &[1, 2, 3, 4]);
        let body = &bs.write_buffer[5..bs.write_buffer.len() - 1];
        assert_eq!(body, expected.as_bytes());
    }

    #[test]
    fn test_ssl_refused() {
        let mut bs = BufferSet::new();
        let mut sm = ConnectionStateMachine::new(&opts(SslMode::Require));
        assert!(matches!(sm.step(&mut bs).unwrap(), Action::WriteAndReadByte));
        sm.set_ssl_response(b'N');
        assert!(matches!(sm.step(&mut bs), Err(Error::Auth(_))));

        let mut sm = ConnectionStateMachine::new(&opts(SslMode::Prefer));
        sm.step(&mut bs).unwrap();
        sm.set_ssl_response(b'N');
        assert!(matches!(sm.step(&mut bs).unwrap(), Action::WriteAndReadMessage));
    }

    #[test]
    fn test_tls_accepted() {
        let mut bs = BufferSet::new();
        let mut sm = ConnectionStateMachine::new(&opts(SslMode::VerifyFull));
        sm.step(&mut bs).unwrap();
        sm.set_ssl_response(b'S');
        assert!(matches!(sm.step(&mut bs).unwrap(), Action::TlsHandshake));
        sm.set_tls_established(Some(vec![9; 32]));
        assert!(matches!(sm.step(&mut bs).unwrap(), Action::WriteAndReadMessage));
    }

    fn sasl(mechanisms: &[&str]) -> (u8, Vec<u8>) {
        let mut extra = Vec::new();
        for m in mechanisms {
            extra.extend_from_slice(m.as_bytes());
            extra.push(0);
        }
        extra.push(0);
        auth(10, &extra)
    }

    fn sasl_mechanism_sent(bs: &BufferSet) -> String {
        let body = &bs.write_buffer[5..];
        let end = body.iter().position(|b| *b == 0).unwrap();
        String::from_utf8(body[..end].to_vec()).unwrap()
    }

    #[test]
    fn test_scram_plus_selected_with_certificate() {
        let mut bs = BufferSet::new();
        let mut sm = ConnectionStateMachine::new(&opts(SslMode::Require));
        sm.step(&mut bs).unwrap();
        sm.set_ssl_response(b'S');
        sm.step(&mut bs).unwrap();
        sm.set_tls_established(Some(vec![1; 32]));
        sm.step(&mut bs).unwrap();

        step_with(&mut sm, &mut bs, sasl(&["SCRAM-SHA-256-PLUS", "SCRAM-SHA-256"])).unwrap();
        assert_eq!(sasl_mechanism_sent(&bs), "SCRAM-SHA-256-PLUS");
    }

    #[test]
    fn test_channel_binding_required() {
        let mut bs = BufferSet::new();
        let mut o = opts(SslMode::Disable);
        o.channel_binding = ChannelBindingMode::Require;
        let mut sm = ConnectionStateMachine::new(&o);
        sm.step(&mut bs).unwrap();
        assert!(matches!(
            step_with(&mut sm, &mut bs, sasl(&["SCRAM-SHA-256"])),
            Err(Error::Auth(_))
        ));

        let mut sm = ConnectionStateMachine::new(&o);
        sm.step(&mut bs).unwrap();
        assert!(matches!(step_with(&mut sm, &mut bs, auth(3, &[])), Err(Error::Auth(_))));
    }

    #[test]
    fn test_plain_scram_without_tls() {
        let mut bs = BufferSet::new();
        let mut sm = ConnectionStateMachine::new(&opts(SslMode::Disable));
        sm.step(&mut bs).unwrap();
        step_with(&mut sm, &mut bs, sasl(&["SCRAM-SHA-256-PLUS", "SCRAM-SHA-256"])).unwrap();
        assert_eq!(sasl_mechanism_sent(&bs), "SCRAM-SHA-256");
    }

    #[test]
    fn test_error_during_startup() {
        let mut bs = BufferSet::new();
        let mut sm = ConnectionStateMachine::new(&opts(SslMode::Disable));
        sm.step(&mut bs).unwrap();
        let err = step_with(&mut sm, &mut bs, error("28P01", "password authentication failed"))
            .unwrap_err();
        assert_eq!(err.sqlstate(), Some("28P01"));
        assert_eq!(sm.ready_status(), None);
    }
}
