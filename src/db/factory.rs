// Connection Factories
// Driver-backed and provider-backed implementations of ConnectionFactory

use crate::db::connection::ConnectionError;
use crate::db::credentials::{scrub_properties, Password, PASSWORD_KEY, USER_KEY};
use crate::db::traits::{Connection, ConnectionFactory, ConnectionProvider, Driver, Properties};
use std::fmt;
use std::sync::Arc;

/// Calls a driver directly with a fixed connect string and property set
pub struct DriverConnectionFactory {
    driver: Arc<dyn Driver>,
    connect_string: String,
    properties: Properties,
}

impl DriverConnectionFactory {
    pub fn new(driver: Arc<dyn Driver>, connect_string: impl Into<String>, properties: Properties) -> Self {
        Self {
            driver,
            connect_string: connect_string.into(),
            properties,
        }
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn connect_string(&self) -> &str {
        &self.connect_string
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }
}

#[async_trait::async_trait]
impl ConnectionFactory for DriverConnectionFactory {
    async fn create_connection(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        self.driver.connect(&self.connect_string, &self.properties).await
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for DriverConnectionFactory {
    fn drop(&mut self) {
        scrub_properties(&mut self.properties);
    }
}

impl fmt::Debug for DriverConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&String> = self.properties.keys().collect();
        f.debug_struct("DriverConnectionFactory")
            .field("driver", &self.driver.name())
            .field("connect_string", &self.connect_string)
            .field("property_keys", &keys)
            .finish()
    }
}

/// Delegates to an externally configured provider, optionally overriding its credentials
pub struct ProviderConnectionFactory {
    provider: Arc<dyn ConnectionProvider>,
    username: Option<String>,
    password: Option<Password>,
}

impl ProviderConnectionFactory {
    /// Use the provider's default credentials
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            provider,
            username: None,
            password: None,
        }
    }

    /// Override the provider's credentials on every call
    pub fn with_credentials(
        provider: Arc<dyn ConnectionProvider>,
        username: Option<String>,
        password: Option<Password>,
    ) -> Self {
        Self {
            provider,
            username,
            password,
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }
}

#[async_trait::async_trait]
impl ConnectionFactory for ProviderConnectionFactory {
    async fn create_connection(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        if self.username.is_none() && self.password.is_none() {
            return self.provider.get_connection().await;
        }
        self.provider
            .get_connection_as(
                self.username.as_deref(),
                self.password.as_ref().map(Password::expose),
            )
            .await
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl fmt::Debug for ProviderConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConnectionFactory")
            .field("username", &self.username)
            .field("password", &self.password)
            .finish()
    }
}

/// Provider preconfigured with a driver, connect string and default properties.
///
/// Credentialed calls replace the `user` and `password` entries for that call only.
pub struct DriverConnectionProvider {
    driver: Arc<dyn Driver>,
    connect_string: String,
    properties: Properties,
}

impl DriverConnectionProvider {
    pub fn new(driver: Arc<dyn Driver>, connect_string: impl Into<String>, properties: Properties) -> Self {
        Self {
            driver,
            connect_string: connect_string.into(),
            properties,
        }
    }
}

#[async_trait::async_trait]
impl ConnectionProvider for DriverConnectionProvider {
    async fn get_connection(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        self.driver.connect(&self.connect_string, &self.properties).await
    }

    async fn get_connection_as(
        &self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Box<dyn Connection>, ConnectionError> {
        let mut properties = self.properties.clone();
        match username {
            Some(user) => properties.insert(USER_KEY.to_string(), user.to_string()),
            None => properties.remove(USER_KEY),
        };
        match password {
            Some(pwd) => properties.insert(PASSWORD_KEY.to_string(), pwd.to_string()),
            None => properties.remove(PASSWORD_KEY),
        };

        let result = self.driver.connect(&self.connect_string, &properties).await;
        scrub_properties(&mut properties);
        result
    }
}

impl Drop for DriverConnectionProvider {
    fn drop(&mut self) {
        scrub_properties(&mut self.properties);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Connection handed out by the recording mocks
    pub struct MockConnection {
        pub id: String,
    }

    #[async_trait::async_trait]
    impl Connection for MockConnection {
        fn connection_id(&self) -> &str {
            &self.id
        }

        async fn is_alive(&self) -> bool {
            true
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    /// Driver that records every connect call
    #[derive(Default)]
    pub struct RecordingDriver {
        pub calls: Mutex<Vec<(String, Properties)>>,
        pub fail_with: Option<String>,
    }

    #[async_trait::async_trait]
    impl Driver for RecordingDriver {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn accepts_url(&self, url: &str) -> bool {
            url.starts_with("jdbc:test:")
        }

        async fn connect(
            &self,
            url: &str,
            properties: &Properties,
        ) -> Result<Box<dyn Connection>, ConnectionError> {
            let mut calls = self.calls.lock();
            calls.push((url.to_string(), properties.clone()));
            if let Some(message) = &self.fail_with {
                return Err(ConnectionError::ConnectionFailed(message.clone()));
            }
            Ok(Box::new(MockConnection {
                id: format!("mock-{}", calls.len()),
            }))
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum ProviderCall {
        Default,
        As(Option<String>, Option<String>),
    }

    #[derive(Default)]
    struct RecordingProvider {
        calls: Mutex<Vec<ProviderCall>>,
    }

    #[async_trait::async_trait]
    impl ConnectionProvider for RecordingProvider {
        async fn get_connection(&self) -> Result<Box<dyn Connection>, ConnectionError> {
            self.calls.lock().push(ProviderCall::Default);
            Ok(Box::new(MockConnection { id: "default".to_string() }))
        }

        async fn get_connection_as(
            &self,
            username: Option<&str>,
            password: Option<&str>,
        ) -> Result<Box<dyn Connection>, ConnectionError> {
            self.calls.lock().push(ProviderCall::As(
                username.map(str::to_string),
                password.map(str::to_string),
            ));
            Ok(Box::new(MockConnection { id: "as".to_string() }))
        }
    }

    #[tokio::test]
    async fn test_driver_factory_passes_fixed_parameters() {
        let driver = Arc::new(RecordingDriver::default());
        let mut props = Properties::new();
        props.insert("user".to_string(), "alice".to_string());
        let factory = DriverConnectionFactory::new(driver.clone(), "jdbc:test://host/db", props.clone());

        let first = factory.create_connection().await.unwrap();
        let second = factory.create_connection().await.unwrap();

        assert_ne!(first.connection_id(), second.connection_id());
        let calls = driver.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], ("jdbc:test://host/db".to_string(), props.clone()));
        assert_eq!(calls[1], ("jdbc:test://host/db".to_string(), props));
    }

    #[tokio::test]
    async fn test_driver_factory_propagates_error() {
        let driver = Arc::new(RecordingDriver {
            fail_with: Some("host unreachable".to_string()),
            ..Default::default()
        });
        let factory = DriverConnectionFactory::new(driver, "jdbc:test://down/db", Properties::new());

        let err = factory.create_connection().await.err().unwrap();
        assert_eq!(err.to_string(), "Connection failed: host unreachable");
    }

    #[tokio::test]
    async fn test_provider_factory_without_overrides_uses_defaults() {
        let provider = Arc::new(RecordingProvider::default());
        let factory = ProviderConnectionFactory::new(provider.clone());

        let conn = factory.create_connection().await.unwrap();

        assert_eq!(conn.connection_id(), "default");
        assert_eq!(*provider.calls.lock(), vec![ProviderCall::Default]);
    }

    #[tokio::test]
    async fn test_provider_factory_with_credentials() {
        let provider = Arc::new(RecordingProvider::default());
        let factory = ProviderConnectionFactory::with_credentials(
            provider.clone(),
            Some("bob".to_string()),
            Some(Password::new("pw")),
        );

        factory.create_connection().await.unwrap();

        assert_eq!(
            *provider.calls.lock(),
            vec![ProviderCall::As(Some("bob".to_string()), Some("pw".to_string()))]
        );
        assert_eq!(factory.username(), Some("bob"));
        assert!(factory.has_password());
    }

    #[tokio::test]
    async fn test_provider_factory_username_only() {
        let provider = Arc::new(RecordingProvider::default());
        let factory = ProviderConnectionFactory::with_credentials(provider.clone(), Some("carol".to_string()), None);

        factory.create_connection().await.unwrap();

        assert_eq!(
            *provider.calls.lock(),
            vec![ProviderCall::As(Some("carol".to_string()), None)]
        );
    }

    #[tokio::test]
    async fn test_driver_provider_overrides_credentials_per_call() {
        let driver = Arc::new(RecordingDriver::default());
        let mut defaults = Properties::new();
        defaults.insert("user".to_string(), "default_user".to_string());
        defaults.insert("password".to_string(), "default_pw".to_string());
        let provider = DriverConnectionProvider::new(driver.clone(), "jdbc:test://h/db", defaults);

        provider.get_connection().await.unwrap();
        provider.get_connection_as(Some("other"), None).await.unwrap();

        let calls = driver.calls.lock();
        assert_eq!(calls[0].1.get("user").map(String::as_str), Some("default_user"));
        assert_eq!(calls[1].1.get("user").map(String::as_str), Some("other"));
        assert!(!calls[1].1.contains_key("password"));
    }

    #[test]
    fn test_debug_hides_password() {
        let driver = Arc::new(RecordingDriver::default());
        let mut props = Properties::new();
        props.insert("password".to_string(), "secret".to_string());
        let factory = DriverConnectionFactory::new(driver, "jdbc:test://h/db", props);

        let rendered = format!("{:?}", factory);
        assert!(rendered.contains("password"));
        assert!(!rendered.contains("secret"));
    }
}
