//! # Table Registry
//!
//! Static mapping between logical entity names (`"Expense"`) and the physical
//! collections backing them (`"expenses"`).
//!
//! Every entity is declared exactly once in the [`entities!`] table below,
//! which generates:
//!
//! * a zero-sized marker type implementing [`Entity`], used to parameterise
//!   typed facades at compile time;
//! * the static descriptor table behind [`physical_collection_for`];
//! * the [`Facades`] struct, holding one typed facade per entity.
//!
//! The mapping is fixed for the lifetime of the process, there is no
//! runtime registration.

use crate::repo::{Repository, facades::FacadeEntity};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown entity `{0}`")]
    UnknownEntity(String),
}

/// A logical entity bound to its physical collection.
pub trait Entity: Send + Sync + 'static {
    const NAME: &'static str;
    const COLLECTION: &'static str;

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor {
            logical_name: Self::NAME,
            physical_collection: Self::COLLECTION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityDescriptor {
    pub logical_name: &'static str,
    pub physical_collection: &'static str,
}

macro_rules! entities {
    ($( $ty:ident => $field:ident : $collection:literal ),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
            pub struct $ty;

            impl Entity for $ty {
                const NAME: &'static str = stringify!($ty);
                const COLLECTION: &'static str = $collection;
            }
        )*

        static TABLE: &[EntityDescriptor] = &[
            $(
                EntityDescriptor {
                    logical_name: stringify!($ty),
                    physical_collection: $collection,
                },
            )*
        ];

        /// One typed facade per registered entity.
        #[derive(Clone)]
        pub struct Facades {
            $( pub $field: FacadeEntity<$ty>, )*
        }

        impl Facades {
            pub(crate) fn build(repo: &Repository) -> Self {
                Self {
                    $( $field: FacadeEntity::new(repo.clone()), )*
                }
            }
        }
    };
}

entities! {
    FamilyMember => family_member: "family_members",
    Task => task: "tasks",
    Chore => chore: "chores",
    Expense => expense: "expenses",
    Budget => budget: "budgets",
    Bill => bill: "bills",
    RecurringPayment => recurring_payment: "recurring_payments",
    SavingsGoal => savings_goal: "savings_goals",
    Allowance => allowance: "allowances",
    InventoryItem => inventory_item: "inventory_items",
    ShoppingListItem => shopping_list_item: "shopping_list_items",
    MealPlan => meal_plan: "meal_plans",
    Recipe => recipe: "recipes",
    Medication => medication: "medications",
    MedicationLog => medication_log: "medication_logs",
    HealthRecord => health_record: "health_records",
    Appointment => appointment: "appointments",
    Schedule => schedule: "schedules",
    CalendarEvent => calendar_event: "calendar_events",
    Reminder => reminder: "reminders",
    Note => note: "notes",
    Contact => contact: "contacts",
    Document => document: "documents",
    Vehicle => vehicle: "vehicles",
    MaintenanceRecord => maintenance_record: "maintenance_records",
    Pet => pet: "pets",
    PetCareLog => pet_care_log: "pet_care_logs",
    SchoolActivity => school_activity: "school_activities",
    HomeworkAssignment => homework_assignment: "homework_assignments",
    Trip => trip: "trips",
    GiftIdea => gift_idea: "gift_ideas",
    Warranty => warranty: "warranties",
    UtilityReading => utility_reading: "utility_readings",
}

/// All registered entities, in declaration order.
pub fn descriptors() -> impl Iterator<Item = &'static EntityDescriptor> {
    TABLE.iter()
}

pub fn descriptor_for(logical_name: &str) -> Result<&'static EntityDescriptor, Error> {
    TABLE
        .iter()
        .find(|d| d.logical_name == logical_name)
        .ok_or_else(|| Error::UnknownEntity(logical_name.to_owned()))
}

pub fn physical_collection_for(logical_name: &str) -> Result<&'static str, Error> {
    descriptor_for(logical_name).map(|d| d.physical_collection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Field;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique() {
        let logical: HashSet<_> = descriptors().map(|d| d.logical_name).collect();
        let physical: HashSet<_> = descriptors().map(|d| d.physical_collection).collect();

        assert_eq!(logical.len(), TABLE.len());
        assert_eq!(physical.len(), TABLE.len());
    }

    #[test]
    fn collections_are_identifiers() {
        for d in descriptors() {
            assert!(Field::try_new(d.physical_collection).is_ok(), "{d:?}");
        }
    }

    #[test]
    fn lookup() {
        assert_eq!(physical_collection_for("Expense").unwrap(), "expenses");
        assert_eq!(Task::COLLECTION, "tasks");
        assert_eq!(InventoryItem::descriptor().logical_name, "InventoryItem");

        let err = physical_collection_for("Spaceship").unwrap_err();
        assert!(matches!(err, Error::UnknownEntity(name) if name == "Spaceship"));
    }
}
