//! ELFとDWARFの読み込み機能

use crate::Result;
use object::{Object, ObjectSection};
use std::fs;
use std::path::Path;

/// gimli のリーダー型
pub type DwarfReader = gimli::EndianSlice<'static, gimli::RunTimeEndian>;

/// DWARFローダー
pub struct DwarfLoader {
    /// オブジェクトファイル
    object_file: object::File<'static>,
}

impl DwarfLoader {
    /// ELFファイルを読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file_data = fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read file {:?}: {}", path, e))?;

        // モジュールはセッション中ずっと参照されるため 'static にする
        let file_data: &'static [u8] = Box::leak(file_data.into_boxed_slice());

        let object_file = object::File::parse(file_data)
            .map_err(|e| anyhow::anyhow!("Failed to parse ELF file {:?}: {}", path, e))?;

        Ok(Self { object_file })
    }

    /// DWARFセクションを読み込む
    pub fn dwarf(&self) -> Result<gimli::Dwarf<DwarfReader>> {
        let endian = if self.object_file.is_little_endian() {
            gimli::RunTimeEndian::Little
        } else {
            gimli::RunTimeEndian::Big
        };

        let object_file = &self.object_file;
        let load_section = |id: gimli::SectionId| -> Result<DwarfReader> {
            let data = object_file
                .section_by_name(id.name())
                .and_then(|section| section.data().ok())
                .unwrap_or(&[]);
            Ok(gimli::EndianSlice::new(data, endian))
        };

        gimli::Dwarf::load(load_section)
            .map_err(|e| anyhow::anyhow!("Failed to load DWARF sections: {}", e))
    }

    /// 行テーブル検索用の addr2line コンテキストを構築する
    pub fn line_context(&self) -> Result<addr2line::Context<DwarfReader>> {
        let dwarf = self.dwarf()?;
        addr2line::Context::from_dwarf(dwarf)
            .map_err(|e| anyhow::anyhow!("Failed to build line context: {}", e))
    }

    /// オブジェクトファイルへの参照を取得
    pub fn object_file(&self) -> &object::File<'static> {
        &self.object_file
    }

    /// ファイル内アドレスの基準値
    ///
    /// PIE（ET_DYN）では 0、非PIEでは最初のロードセグメントの仮想アドレスです。
    /// モジュール先頭からのオフセットにこの値を足すとファイル内アドレスになります。
    pub fn image_base(&self) -> u64 {
        self.object_file.relative_address_base()
    }
}
