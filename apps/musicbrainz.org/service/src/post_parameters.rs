use std::collections::{BTreeMap, HashMap};

use maud::{Markup, html};

const TOGGLE_LABEL: &str = "Data submitted with this request";
const COLLAPSED_CLASS: &str = "all-collapsed";
const HYDRATION_CLASS: &str = "post-parameters";
const INPUT_ID_PREFIX: &str = "post-parameter-";
const INPUT_SIZE: &str = "50";

/// Form fields submitted with a request, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostParameters {
    params: HashMap<String, String>,
}

impl PostParameters {
    pub fn new(params: HashMap<String, String>) -> Self {
        Self { params }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Entries ordered by name, compared by code point.
    pub fn sorted(&self) -> Vec<(&str, &str)> {
        let mut sorted: Vec<(&str, &str)> = self
            .params
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        sorted.sort_unstable_by(|left, right| left.0.cmp(right.0));
        sorted
    }
}

impl From<HashMap<String, String>> for PostParameters {
    fn from(params: HashMap<String, String>) -> Self {
        Self::new(params)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PostParameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExpansionState {
    #[default]
    Collapsed,
    Expanded,
}

impl ExpansionState {
    pub fn toggle(self) -> Self {
        match self {
            Self::Collapsed => Self::Expanded,
            Self::Expanded => Self::Collapsed,
        }
    }

    pub fn is_expanded(self) -> bool {
        self == Self::Expanded
    }

    fn arrow(self) -> &'static str {
        match self {
            Self::Collapsed => "▶ ",
            Self::Expanded => "▼ ",
        }
    }

    fn table_class(self) -> Option<&'static str> {
        match self {
            Self::Collapsed => Some(COLLAPSED_CLASS),
            Self::Expanded => None,
        }
    }
}

/// Expandable table of submitted parameters, each editable for resubmission.
#[derive(Debug, Clone)]
pub struct PostParametersInspector {
    params: PostParameters,
    state: ExpansionState,
}

impl PostParametersInspector {
    pub fn new(params: PostParameters) -> Self {
        Self {
            params,
            state: ExpansionState::default(),
        }
    }

    pub fn params(&self) -> &PostParameters {
        &self.params
    }

    pub fn state(&self) -> ExpansionState {
        self.state
    }

    /// Handler for the expand link.
    pub fn on_toggle_click(&mut self) {
        self.state = self.state.toggle();
    }

    /// The toggle link followed by the parameter table. A collapsed table
    /// is still rendered, only hidden by its class.
    pub fn render(&self) -> Markup {
        let sorted = self.params.sorted();
        html! {
            a class="expand-link" href="#" {
                (self.state.arrow())
                (TOGGLE_LABEL)
            }
            table class=[self.state.table_class()] {
                tbody {
                    @for (index, (param, value)) in sorted.iter().enumerate() {
                        @let id = format!("{INPUT_ID_PREFIX}{index}");
                        tr data-key=(param) {
                            td {
                                label for=(id) { (param) }
                            }
                            td {
                                input id=(id) name=(param) size=(INPUT_SIZE) type="text" value=(value);
                            }
                        }
                    }
                }
            }
        }
    }

    /// [`render`](Self::render) wrapped in the container a client bundle
    /// hydrates, with the props it needs in `data-props`.
    pub fn render_hydratable(&self) -> Result<Markup, serde_json::Error> {
        let props = serde_json::json!({
            "params": self.params.sorted().into_iter().collect::<BTreeMap<_, _>>(),
        });
        let props = serde_json::to_string(&props)?;
        Ok(html! {
            div class=(HYDRATION_CLASS) data-props=(props) {
                (self.render())
            }
        })
    }
}
