pub mod client;
pub mod schemas;
pub mod selection;
pub mod settings;
pub mod telemetry;

pub mod query {
    use std::fmt::Display;

    /// Builds the query of a link from `key : Option<value>` pairs, keeping
    /// their order. Values are lowercased and `None` leaves the key out.
    /// ```
    /// use opthub_lib::query_builder;
    ///
    /// let start: Option<u64> = None;
    /// let query = query_builder!(
    ///     "start" : start,
    ///     "limit" : Some(20),
    ///     "order" : Some("ASC")
    /// ).to_vec();
    /// assert_eq!(
    ///     query,
    ///     vec![
    ///         ("limit".to_string(), "20".to_string()),
    ///         ("order".to_string(), "asc".to_string()),
    ///     ]
    /// );
    /// ```
    #[macro_export]
    macro_rules! query_builder {
        ($($lit:literal : $val:expr),+ $(,)?) => {
            {
                let mut query: Vec<(String, String)> = Vec::new();

                $(
                    if let Some(value) = $crate::query::query_value($val) {
                        query.push(($lit.to_string(), value));
                    }
                )+

                $crate::query::Query::new(query)
            }
        }
    }

    /// Meant for Single value tuple Enums that share a common trait
    /// self is expected to be an enum
    /// path should be each of the Variants of the enum
    ///
    /// ```
    /// use opthub_lib::gen_matches;
    /// trait Command {}
    ///
    /// struct Submit {}
    /// impl Command for Submit {}
    ///
    /// struct Check {}
    /// impl Command for Check {}
    ///
    /// enum Cli {
    ///     Submit(Submit),
    ///     Check(Check),
    /// }
    ///
    /// impl Cli {
    ///     fn cmd_value(&self) -> &dyn Command {
    ///         gen_matches!(self, Cli::Submit, Cli::Check)
    ///     }
    /// }
    /// ```
    #[macro_export]
    macro_rules! gen_matches {
        ($self:ident, $($path:path),*) => {
            match $self {
                $($path(value) => value,)+
            }
        };
    }

    /// Query represents a list of arguments found in a URL as Key/Values
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Query {
        pub query: Vec<(String, String)>,
    }

    impl Query {
        pub fn new(query: Vec<(String, String)>) -> Self {
            Query { query }
        }

        pub fn to_vec(&self) -> Vec<(String, String)> {
            self.query.to_vec()
        }
    }

    pub fn query_value<T: Display>(value: Option<T>) -> Option<String> {
        value.map(|v| v.to_string().to_lowercase())
    }
}
