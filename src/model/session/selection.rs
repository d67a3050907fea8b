use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::catalogue::{Candidate, CandidateId};

/// An independent race on the ballot, e.g. `MNA` or `MPA`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The non-empty set of races every ballot must fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct RequiredCategories(BTreeSet<Category>);

impl RequiredCategories {
    pub fn contains(&self, category: &Category) -> bool {
        self.0.contains(category)
    }

    /// Iterate in the fixed (ascending) category order.
    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<String>> for RequiredCategories {
    type Error = SelectionError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        let categories = names
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .map(Category)
            .collect::<BTreeSet<_>>();
        if categories.is_empty() {
            return Err(SelectionError::NoCategories);
        }
        Ok(Self(categories))
    }
}

impl From<RequiredCategories> for Vec<String> {
    fn from(categories: RequiredCategories) -> Self {
        categories.0.into_iter().map(|c| c.0).collect()
    }
}

/// One candidate chosen for one category, with the display fields the
/// confirmation screen needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub category: Category,
    pub candidate: CandidateId,
    pub name: String,
    pub constituency: String,
}

impl From<Candidate> for Choice {
    fn from(candidate: Candidate) -> Self {
        Self {
            category: candidate.category,
            candidate: candidate.id,
            name: candidate.name,
            constituency: candidate.constituency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("At least one ballot category must be configured")]
    NoCategories,
    #[error("'{0}' is not a category on this ballot")]
    UnknownCategory(Category),
}

/// The partial or complete ballot of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionSet {
    required: RequiredCategories,
    choices: BTreeMap<Category, Choice>,
}

impl SelectionSet {
    pub fn new(required: RequiredCategories) -> Self {
        Self {
            required,
            choices: BTreeMap::new(),
        }
    }

    /// Record a choice, replacing any earlier one for the same category.
    /// Returns whether the ballot is now complete.
    pub fn record_choice(&mut self, choice: Choice) -> Result<bool, SelectionError> {
        if !self.required.contains(&choice.category) {
            return Err(SelectionError::UnknownCategory(choice.category));
        }
        self.choices.insert(choice.category.clone(), choice);
        Ok(self.is_complete())
    }

    pub fn is_complete(&self) -> bool {
        self.required
            .iter()
            .all(|category| self.choices.contains_key(category))
    }

    pub fn clear(&mut self) {
        self.choices.clear();
    }

    pub fn choice(&self, category: &Category) -> Option<&Choice> {
        self.choices.get(category)
    }

    /// Choices in category order.
    pub fn choices(&self) -> impl Iterator<Item = &Choice> {
        self.choices.values()
    }

    pub fn required(&self) -> &RequiredCategories {
        &self.required
    }

    /// Freeze into a [`CompletedBallot`], if every category has a choice.
    pub fn completed(&self) -> Option<CompletedBallot> {
        self.is_complete().then(|| CompletedBallot {
            choices: self
                .required
                .iter()
                .filter_map(|category| {
                    self.choices
                        .get(category)
                        .map(|choice| (category.clone(), choice.clone()))
                })
                .collect(),
        })
    }
}

/// A ballot with exactly one choice per required category.
/// Can only be obtained through [`SelectionSet::completed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedBallot {
    choices: BTreeMap<Category, Choice>,
}

impl CompletedBallot {
    pub fn choices(&self) -> impl Iterator<Item = &Choice> {
        self.choices.values()
    }

    /// Candidate IDs keyed by category.
    pub fn candidate_ids(&self) -> BTreeMap<Category, CandidateId> {
        self.choices
            .iter()
            .map(|(category, choice)| (category.clone(), choice.candidate.clone()))
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_choice_per_category_wins() {
        let mut selections = SelectionSet::new(RequiredCategories::example());
        selections.record_choice(Choice::example_mna()).unwrap();
        selections.record_choice(Choice::example_other_mna()).unwrap();

        let mna = selections.choice(&Category::new("MNA")).unwrap();
        assert_eq!(mna.candidate, CandidateId::new("cand-3"));
        assert_eq!(selections.choices().count(), 1);
    }

    #[test]
    fn complete_only_when_every_category_chosen() {
        let mut selections = SelectionSet::new(RequiredCategories::example());
        assert!(!selections.is_complete());
        assert!(selections.completed().is_none());

        assert!(!selections.record_choice(Choice::example_mna()).unwrap());
        assert!(!selections.is_complete());

        assert!(selections.record_choice(Choice::example_mpa()).unwrap());
        assert!(selections.is_complete());
        assert_eq!(selections.completed().unwrap().choices().count(), 2);
    }

    #[test]
    fn order_of_choices_does_not_matter() {
        let mut forwards = SelectionSet::new(RequiredCategories::example());
        forwards.record_choice(Choice::example_mna()).unwrap();
        forwards.record_choice(Choice::example_mpa()).unwrap();

        let mut backwards = SelectionSet::new(RequiredCategories::example());
        backwards.record_choice(Choice::example_mpa()).unwrap();
        backwards.record_choice(Choice::example_mna()).unwrap();

        assert_eq!(forwards, backwards);
        assert_eq!(
            forwards.completed().unwrap().candidate_ids(),
            backwards.completed().unwrap().candidate_ids()
        );
    }

    #[test]
    fn unknown_category_rejected() {
        let mut selections = SelectionSet::new(RequiredCategories::example());
        let mut senate = Choice::example_mna();
        senate.category = Category::new("Senate");

        assert_eq!(
            selections.record_choice(senate),
            Err(SelectionError::UnknownCategory(Category::new("Senate")))
        );
        assert_eq!(selections.choices().count(), 0);
    }

    #[test]
    fn clear_empties_choices() {
        let mut selections = SelectionSet::new(RequiredCategories::example());
        selections.record_choice(Choice::example_mna()).unwrap();
        selections.record_choice(Choice::example_mpa()).unwrap();
        selections.clear();

        assert!(!selections.is_complete());
        assert_eq!(selections.choices().count(), 0);
    }

    #[test]
    fn required_categories_must_not_be_empty() {
        assert_eq!(
            RequiredCategories::try_from(vec![]),
            Err(SelectionError::NoCategories)
        );
        assert_eq!(
            RequiredCategories::try_from(vec!["  ".to_string()]),
            Err(SelectionError::NoCategories)
        );
        let categories = RequiredCategories::try_from(vec![
            "MPA".to_string(),
            "MNA".to_string(),
            "MNA".to_string(),
        ])
        .unwrap();
        assert_eq!(
            categories.iter().map(Category::as_str).collect::<Vec<_>>(),
            vec!["MNA", "MPA"]
        );
    }
}
