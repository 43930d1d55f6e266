use ahash::AHashMap;

use crate::{CarType, CarTypeDef, CargoTables, CargoType, ContainerType};

/// Lookup tables derived once from [`CargoTables`].
///
/// Every list keeps the order of the source tables so random picks over them
/// stay reproducible for a given seed.
#[derive(Debug, Clone, Default)]
pub struct CargoCapabilityIndex {
    cargo_by_car_type: AHashMap<CarType, Vec<CargoType>>,
    containers_by_cargo: AHashMap<CargoType, Vec<ContainerType>>,
    car_types_by_container: AHashMap<ContainerType, Vec<CarType>>,
    car_types: AHashMap<CarType, CarTypeDef>,
}

impl CargoCapabilityIndex {
    pub fn build(tables: &CargoTables) -> Self {
        let mut index = Self::default();

        for cargo in &tables.cargo_types {
            index
                .containers_by_cargo
                .insert(cargo.id.clone(), cargo.containers.clone());
        }

        for car_type in &tables.car_types {
            index
                .car_types_by_container
                .entry(car_type.container.clone())
                .or_default()
                .push(car_type.id.clone());

            let supported: Vec<CargoType> = tables
                .cargo_types
                .iter()
                .filter(|cargo| cargo.containers.contains(&car_type.container))
                .map(|cargo| cargo.id.clone())
                .collect();
            index.cargo_by_car_type.insert(car_type.id.clone(), supported);
            index.car_types.insert(car_type.id.clone(), car_type.clone());
        }

        index
    }

    pub fn cargo_types_for_car_type(&self, car_type: &CarType) -> &[CargoType] {
        self.cargo_by_car_type
            .get(car_type)
            .map_or(&[], Vec::as_slice)
    }

    pub fn container_types_for_cargo(&self, cargo: &CargoType) -> &[ContainerType] {
        self.containers_by_cargo
            .get(cargo)
            .map_or(&[], Vec::as_slice)
    }

    pub fn car_types_for_container(&self, container: &ContainerType) -> &[CarType] {
        self.car_types_by_container
            .get(container)
            .map_or(&[], Vec::as_slice)
    }

    pub fn container_of(&self, car_type: &CarType) -> Option<&ContainerType> {
        self.car_types.get(car_type).map(|def| &def.container)
    }

    pub fn car_length(&self, car_type: &CarType) -> Option<f32> {
        self.car_types.get(car_type).map(|def| def.length_m)
    }

    pub fn is_locomotive(&self, car_type: &CarType) -> bool {
        self.car_types.get(car_type).is_some_and(|def| def.locomotive)
    }

    /// Cargo types from `cargo_types` that `car_type` can carry, in capability order.
    pub fn compatible_cargo(&self, car_type: &CarType, cargo_types: &[CargoType]) -> Vec<CargoType> {
        self.cargo_types_for_car_type(car_type)
            .iter()
            .filter(|cargo| cargo_types.contains(cargo))
            .cloned()
            .collect()
    }

    pub fn can_carry_any(&self, car_type: &CarType, cargo_types: &[CargoType]) -> bool {
        self.cargo_types_for_car_type(car_type)
            .iter()
            .any(|cargo| cargo_types.contains(cargo))
    }
}
